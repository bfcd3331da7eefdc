use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::bus::BusIndexMap;
use crate::elements::{
    check_bus, check_id, check_init_len, solver_bus, Element, InjectionRes, Triplet,
};
use crate::error::Result;

/// A bus shunt given by the power it absorbs at 1 pu voltage. Positive
/// `q_mvar` is inductive. Stamped on the admittance matrix diagonal as
/// `-(p + jq) / sn_mva`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shunt {
    pub bus: usize,
    pub p_mw: f64,
    pub q_mvar: f64,
    pub status: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Shunts {
    shunt: Vec<Shunt>,
    res: Vec<InjectionRes>,
}

impl Shunts {
    pub(crate) fn init(&mut self, p_mw: &[f64], q_mvar: &[f64], bus: &[usize]) -> Result<()> {
        check_init_len(p_mw.len(), q_mvar.len())?;
        check_init_len(p_mw.len(), bus.len())?;
        self.shunt = (0..p_mw.len())
            .map(|i| Shunt {
                bus: bus[i],
                p_mw: p_mw[i],
                q_mvar: q_mvar[i],
                status: true,
            })
            .collect();
        self.reset_results();
        Ok(())
    }

    pub fn nb(&self) -> usize {
        self.shunt.len()
    }

    pub(crate) fn deactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.shunt.len(), "shunt", id)?;
        self.shunt[id].status = false;
        Ok(())
    }

    pub(crate) fn reactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.shunt.len(), "shunt", id)?;
        self.shunt[id].status = true;
        Ok(())
    }

    pub(crate) fn change_bus(&mut self, id: usize, new_bus: usize, n_bus: usize) -> Result<()> {
        check_id(self.shunt.len(), "shunt", id)?;
        check_bus(n_bus, "bus", new_bus)?;
        self.shunt[id].bus = new_bus;
        Ok(())
    }

    pub(crate) fn change_p(&mut self, id: usize, p_mw: f64) -> Result<()> {
        check_id(self.shunt.len(), "shunt", id)?;
        self.shunt[id].p_mw = p_mw;
        Ok(())
    }

    pub(crate) fn change_q(&mut self, id: usize, q_mvar: f64) -> Result<()> {
        check_id(self.shunt.len(), "shunt", id)?;
        self.shunt[id].q_mvar = q_mvar;
        Ok(())
    }

    pub fn bus(&self, id: usize) -> Result<usize> {
        check_id(self.shunt.len(), "shunt", id)?;
        Ok(self.shunt[id].bus)
    }

    pub fn status(&self) -> Vec<bool> {
        self.shunt.iter().map(|s| s.status).collect()
    }

    pub fn res(&self) -> &[InjectionRes] {
        &self.res
    }

    pub(crate) fn reset_results(&mut self) {
        self.res = vec![InjectionRes::default(); self.shunt.len()];
    }

    /// Actual absorbed power scales with the squared voltage magnitude,
    /// the shunt being an admittance.
    pub(crate) fn compute_results(
        &mut self,
        v: &[Complex64],
        bus_map: &BusIndexMap,
        bus_vn_kv: &[f64],
        _sn_mva: f64,
    ) -> Result<()> {
        self.reset_results();
        for (i, shunt) in self.shunt.iter().enumerate() {
            if !shunt.status {
                continue;
            }
            let b = solver_bus(bus_map, "shunt", i, shunt.bus)?;
            let vm = v[b].norm();
            self.res[i] = InjectionRes {
                p_mw: shunt.p_mw * vm * vm,
                q_mvar: shunt.q_mvar * vm * vm,
                v_kv: vm * bus_vn_kv[shunt.bus],
            };
        }
        Ok(())
    }

    pub(crate) fn p_at_bus(&self, bus: usize) -> f64 {
        self.shunt
            .iter()
            .zip(&self.res)
            .filter(|(s, _)| s.status && s.bus == bus)
            .map(|(_, r)| r.p_mw)
            .sum()
    }

    pub(crate) fn add_q_by_bus(&self, q: &mut [f64]) {
        for (shunt, res) in self.shunt.iter().zip(&self.res) {
            if shunt.status {
                q[shunt.bus] += res.q_mvar;
            }
        }
    }

    pub(crate) fn state(&self) -> Vec<Shunt> {
        self.shunt.clone()
    }

    pub(crate) fn set_state(&mut self, state: Vec<Shunt>) {
        self.shunt = state;
        self.reset_results();
    }
}

impl Element for Shunts {
    fn fill_ybus(
        &self,
        triplets: &mut Vec<Triplet>,
        ac: bool,
        bus_map: &BusIndexMap,
        sn_mva: f64,
    ) -> Result<()> {
        if !ac {
            return Ok(());
        }
        for (i, shunt) in self.shunt.iter().enumerate() {
            if !shunt.status {
                continue;
            }
            let b = solver_bus(bus_map, "shunt", i, shunt.bus)?;
            triplets.push((
                b,
                b,
                -Complex64::new(shunt.p_mw, shunt.q_mvar) / Complex64::new(sn_mva, 0.0),
            ));
        }
        Ok(())
    }

    fn fill_sbus(
        &self,
        s_bus: &mut [Complex64],
        ac: bool,
        bus_map: &BusIndexMap,
        sn_mva: f64,
    ) -> Result<()> {
        if ac {
            return Ok(());
        }
        // in the linearized model the shunt acts as a constant active draw
        for (i, shunt) in self.shunt.iter().enumerate() {
            if !shunt.status {
                continue;
            }
            let b = solver_bus(bus_map, "shunt", i, shunt.bus)?;
            s_bus[b] -= Complex64::new(shunt.p_mw / sn_mva, 0.0);
        }
        Ok(())
    }
}
