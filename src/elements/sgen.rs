use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::bus::BusIndexMap;
use crate::elements::{check_bus, check_id, check_init_len, solver_bus, Element, InjectionRes};
use crate::error::Result;

/// A static generator: constant P, Q injection that never controls voltage.
/// The operating limits are carried along for reporting but play no role in
/// the power flow itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SGen {
    pub bus: usize,
    pub p_mw: f64,
    pub q_mvar: f64,
    pub min_p_mw: f64,
    pub max_p_mw: f64,
    pub min_q_mvar: f64,
    pub max_q_mvar: f64,
    pub status: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SGens {
    sgen: Vec<SGen>,
    res: Vec<InjectionRes>,
}

impl SGens {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn init(
        &mut self,
        p_mw: &[f64],
        q_mvar: &[f64],
        min_p_mw: &[f64],
        max_p_mw: &[f64],
        min_q_mvar: &[f64],
        max_q_mvar: &[f64],
        bus: &[usize],
    ) -> Result<()> {
        check_init_len(p_mw.len(), q_mvar.len())?;
        check_init_len(p_mw.len(), min_p_mw.len())?;
        check_init_len(p_mw.len(), max_p_mw.len())?;
        check_init_len(p_mw.len(), min_q_mvar.len())?;
        check_init_len(p_mw.len(), max_q_mvar.len())?;
        check_init_len(p_mw.len(), bus.len())?;
        self.sgen = (0..p_mw.len())
            .map(|i| SGen {
                bus: bus[i],
                p_mw: p_mw[i],
                q_mvar: q_mvar[i],
                min_p_mw: min_p_mw[i],
                max_p_mw: max_p_mw[i],
                min_q_mvar: min_q_mvar[i],
                max_q_mvar: max_q_mvar[i],
                status: true,
            })
            .collect();
        self.reset_results();
        Ok(())
    }

    pub fn nb(&self) -> usize {
        self.sgen.len()
    }

    pub(crate) fn deactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.sgen.len(), "sgen", id)?;
        self.sgen[id].status = false;
        Ok(())
    }

    pub(crate) fn reactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.sgen.len(), "sgen", id)?;
        self.sgen[id].status = true;
        Ok(())
    }

    pub(crate) fn change_bus(&mut self, id: usize, new_bus: usize, n_bus: usize) -> Result<()> {
        check_id(self.sgen.len(), "sgen", id)?;
        check_bus(n_bus, "bus", new_bus)?;
        self.sgen[id].bus = new_bus;
        Ok(())
    }

    pub(crate) fn change_p(&mut self, id: usize, p_mw: f64) -> Result<()> {
        check_id(self.sgen.len(), "sgen", id)?;
        self.sgen[id].p_mw = p_mw;
        Ok(())
    }

    pub(crate) fn change_q(&mut self, id: usize, q_mvar: f64) -> Result<()> {
        check_id(self.sgen.len(), "sgen", id)?;
        self.sgen[id].q_mvar = q_mvar;
        Ok(())
    }

    pub fn bus(&self, id: usize) -> Result<usize> {
        check_id(self.sgen.len(), "sgen", id)?;
        Ok(self.sgen[id].bus)
    }

    pub fn status(&self) -> Vec<bool> {
        self.sgen.iter().map(|s| s.status).collect()
    }

    pub fn res(&self) -> &[InjectionRes] {
        &self.res
    }

    pub(crate) fn reset_results(&mut self) {
        self.res = vec![InjectionRes::default(); self.sgen.len()];
    }

    pub(crate) fn compute_results(
        &mut self,
        v: &[Complex64],
        bus_map: &BusIndexMap,
        bus_vn_kv: &[f64],
        _sn_mva: f64,
    ) -> Result<()> {
        self.reset_results();
        for (i, sgen) in self.sgen.iter().enumerate() {
            if !sgen.status {
                continue;
            }
            let b = solver_bus(bus_map, "sgen", i, sgen.bus)?;
            self.res[i] = InjectionRes {
                p_mw: sgen.p_mw,
                q_mvar: sgen.q_mvar,
                v_kv: v[b].norm() * bus_vn_kv[sgen.bus],
            };
        }
        Ok(())
    }

    /// Injections reduce what the bus draws from the rest of the grid.
    pub(crate) fn p_at_bus(&self, bus: usize) -> f64 {
        self.sgen
            .iter()
            .filter(|s| s.status && s.bus == bus)
            .map(|s| -s.p_mw)
            .sum()
    }

    pub(crate) fn add_q_by_bus(&self, q: &mut [f64]) {
        for sgen in &self.sgen {
            if sgen.status {
                q[sgen.bus] -= sgen.q_mvar;
            }
        }
    }

    pub(crate) fn state(&self) -> Vec<SGen> {
        self.sgen.clone()
    }

    pub(crate) fn set_state(&mut self, state: Vec<SGen>) {
        self.sgen = state;
        self.reset_results();
    }
}

impl Element for SGens {
    fn fill_sbus(
        &self,
        s_bus: &mut [Complex64],
        ac: bool,
        bus_map: &BusIndexMap,
        sn_mva: f64,
    ) -> Result<()> {
        for (i, sgen) in self.sgen.iter().enumerate() {
            if !sgen.status {
                continue;
            }
            let b = solver_bus(bus_map, "sgen", i, sgen.bus)?;
            if ac {
                s_bus[b] += Complex64::new(sgen.p_mw / sn_mva, sgen.q_mvar / sn_mva);
            } else {
                s_bus[b] += Complex64::new(sgen.p_mw / sn_mva, 0.0);
            }
        }
        Ok(())
    }
}
