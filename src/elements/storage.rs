use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::bus::BusIndexMap;
use crate::elements::{check_bus, check_id, check_init_len, solver_bus, Element, InjectionRes};
use crate::error::Result;

/// A storage unit. Positive `p_mw` means discharging, i.e. injecting power
/// into its bus. Setting P to zero never changes the connection status; a
/// storage unit only disconnects through an explicit topology action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    pub bus: usize,
    pub p_mw: f64,
    pub q_mvar: f64,
    pub status: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Storages {
    storage: Vec<Storage>,
    res: Vec<InjectionRes>,
}

impl Storages {
    pub(crate) fn init(&mut self, p_mw: &[f64], q_mvar: &[f64], bus: &[usize]) -> Result<()> {
        check_init_len(p_mw.len(), q_mvar.len())?;
        check_init_len(p_mw.len(), bus.len())?;
        self.storage = (0..p_mw.len())
            .map(|i| Storage {
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
        self.storage.len()
    }

    pub(crate) fn deactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.storage.len(), "storage", id)?;
        self.storage[id].status = false;
        Ok(())
    }

    pub(crate) fn reactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.storage.len(), "storage", id)?;
        self.storage[id].status = true;
        Ok(())
    }

    pub(crate) fn change_bus(&mut self, id: usize, new_bus: usize, n_bus: usize) -> Result<()> {
        check_id(self.storage.len(), "storage", id)?;
        check_bus(n_bus, "bus", new_bus)?;
        self.storage[id].bus = new_bus;
        Ok(())
    }

    pub(crate) fn change_p(&mut self, id: usize, p_mw: f64) -> Result<()> {
        check_id(self.storage.len(), "storage", id)?;
        self.storage[id].p_mw = p_mw;
        Ok(())
    }

    pub(crate) fn change_q(&mut self, id: usize, q_mvar: f64) -> Result<()> {
        check_id(self.storage.len(), "storage", id)?;
        self.storage[id].q_mvar = q_mvar;
        Ok(())
    }

    pub fn bus(&self, id: usize) -> Result<usize> {
        check_id(self.storage.len(), "storage", id)?;
        Ok(self.storage[id].bus)
    }

    pub fn status(&self) -> Vec<bool> {
        self.storage.iter().map(|s| s.status).collect()
    }

    pub fn res(&self) -> &[InjectionRes] {
        &self.res
    }

    pub(crate) fn reset_results(&mut self) {
        self.res = vec![InjectionRes::default(); self.storage.len()];
    }

    pub(crate) fn compute_results(
        &mut self,
        v: &[Complex64],
        bus_map: &BusIndexMap,
        bus_vn_kv: &[f64],
        _sn_mva: f64,
    ) -> Result<()> {
        self.reset_results();
        for (i, storage) in self.storage.iter().enumerate() {
            if !storage.status {
                continue;
            }
            let b = solver_bus(bus_map, "storage", i, storage.bus)?;
            self.res[i] = InjectionRes {
                p_mw: storage.p_mw,
                q_mvar: storage.q_mvar,
                v_kv: v[b].norm() * bus_vn_kv[storage.bus],
            };
        }
        Ok(())
    }

    pub(crate) fn p_at_bus(&self, bus: usize) -> f64 {
        self.storage
            .iter()
            .filter(|s| s.status && s.bus == bus)
            .map(|s| -s.p_mw)
            .sum()
    }

    pub(crate) fn add_q_by_bus(&self, q: &mut [f64]) {
        for storage in &self.storage {
            if storage.status {
                q[storage.bus] -= storage.q_mvar;
            }
        }
    }

    pub(crate) fn state(&self) -> Vec<Storage> {
        self.storage.clone()
    }

    pub(crate) fn set_state(&mut self, state: Vec<Storage>) {
        self.storage = state;
        self.reset_results();
    }
}

impl Element for Storages {
    fn fill_sbus(
        &self,
        s_bus: &mut [Complex64],
        ac: bool,
        bus_map: &BusIndexMap,
        sn_mva: f64,
    ) -> Result<()> {
        for (i, storage) in self.storage.iter().enumerate() {
            if !storage.status {
                continue;
            }
            let b = solver_bus(bus_map, "storage", i, storage.bus)?;
            if ac {
                s_bus[b] += Complex64::new(storage.p_mw / sn_mva, storage.q_mvar / sn_mva);
            } else {
                s_bus[b] += Complex64::new(storage.p_mw / sn_mva, 0.0);
            }
        }
        Ok(())
    }
}
