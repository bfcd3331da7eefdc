use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::bus::BusIndexMap;
use crate::elements::{check_bus, check_id, check_init_len, solver_bus, Element, InjectionRes};
use crate::error::Result;

/// A constant-power load. Subtracts `(p + jq) / sn_mva` from the injection
/// at its bus (active part only in DC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub bus: usize,
    pub p_mw: f64,
    pub q_mvar: f64,
    pub status: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Loads {
    load: Vec<Load>,
    res: Vec<InjectionRes>,
}

impl Loads {
    pub(crate) fn init(&mut self, p_mw: &[f64], q_mvar: &[f64], bus: &[usize]) -> Result<()> {
        check_init_len(p_mw.len(), q_mvar.len())?;
        check_init_len(p_mw.len(), bus.len())?;
        self.load = (0..p_mw.len())
            .map(|i| Load {
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
        self.load.len()
    }

    pub(crate) fn deactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.load.len(), "load", id)?;
        self.load[id].status = false;
        Ok(())
    }

    pub(crate) fn reactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.load.len(), "load", id)?;
        self.load[id].status = true;
        Ok(())
    }

    pub(crate) fn change_bus(&mut self, id: usize, new_bus: usize, n_bus: usize) -> Result<()> {
        check_id(self.load.len(), "load", id)?;
        check_bus(n_bus, "bus", new_bus)?;
        self.load[id].bus = new_bus;
        Ok(())
    }

    pub(crate) fn change_p(&mut self, id: usize, p_mw: f64) -> Result<()> {
        check_id(self.load.len(), "load", id)?;
        self.load[id].p_mw = p_mw;
        Ok(())
    }

    pub(crate) fn change_q(&mut self, id: usize, q_mvar: f64) -> Result<()> {
        check_id(self.load.len(), "load", id)?;
        self.load[id].q_mvar = q_mvar;
        Ok(())
    }

    pub fn bus(&self, id: usize) -> Result<usize> {
        check_id(self.load.len(), "load", id)?;
        Ok(self.load[id].bus)
    }

    pub fn status(&self) -> Vec<bool> {
        self.load.iter().map(|l| l.status).collect()
    }

    pub fn res(&self) -> &[InjectionRes] {
        &self.res
    }

    pub(crate) fn reset_results(&mut self) {
        self.res = vec![InjectionRes::default(); self.load.len()];
    }

    pub(crate) fn compute_results(
        &mut self,
        v: &[Complex64],
        bus_map: &BusIndexMap,
        bus_vn_kv: &[f64],
        _sn_mva: f64,
    ) -> Result<()> {
        self.reset_results();
        for (i, load) in self.load.iter().enumerate() {
            if !load.status {
                continue;
            }
            let b = solver_bus(bus_map, "load", i, load.bus)?;
            self.res[i] = InjectionRes {
                p_mw: load.p_mw,
                q_mvar: load.q_mvar,
                v_kv: v[b].norm() * bus_vn_kv[load.bus],
            };
        }
        Ok(())
    }

    pub(crate) fn p_at_bus(&self, bus: usize) -> f64 {
        self.load
            .iter()
            .filter(|l| l.status && l.bus == bus)
            .map(|l| l.p_mw)
            .sum()
    }

    pub(crate) fn add_q_by_bus(&self, q: &mut [f64]) {
        for load in &self.load {
            if load.status {
                q[load.bus] += load.q_mvar;
            }
        }
    }

    pub(crate) fn state(&self) -> Vec<Load> {
        self.load.clone()
    }

    pub(crate) fn set_state(&mut self, state: Vec<Load>) {
        self.load = state;
        self.reset_results();
    }
}

impl Element for Loads {
    fn fill_sbus(
        &self,
        s_bus: &mut [Complex64],
        ac: bool,
        bus_map: &BusIndexMap,
        sn_mva: f64,
    ) -> Result<()> {
        for (i, load) in self.load.iter().enumerate() {
            if !load.status {
                continue;
            }
            let b = solver_bus(bus_map, "load", i, load.bus)?;
            if ac {
                s_bus[b] -= Complex64::new(load.p_mw / sn_mva, load.q_mvar / sn_mva);
            } else {
                s_bus[b] -= Complex64::new(load.p_mw / sn_mva, 0.0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtracts_from_injection() {
        let mut loads = Loads::default();
        loads.init(&[50.0], &[20.0], &[1]).unwrap();
        let map = BusIndexMap::build(&[true, true]);
        let mut s = vec![Complex64::new(0.0, 0.0); 2];
        loads.fill_sbus(&mut s, true, &map, 100.0).unwrap();
        assert_eq!(s[1], Complex64::new(-0.5, -0.2));

        let mut s_dc = vec![Complex64::new(0.0, 0.0); 2];
        loads.fill_sbus(&mut s_dc, false, &map, 100.0).unwrap();
        assert_eq!(s_dc[1], Complex64::new(-0.5, 0.0));
    }
}
