mod gen;
mod line;
mod load;
mod sgen;
mod shunt;
mod storage;
mod trafo;

pub use gen::{Gen, Gens};
pub use line::{Line, Lines};
pub use load::{Load, Loads};
pub use sgen::{SGen, SGens};
pub use shunt::{Shunt, Shunts};
pub use storage::{Storage, Storages};
pub use trafo::{Trafo, Trafos};

use num_complex::Complex64;

use crate::bus::BusIndexMap;
use crate::error::{Error, Result};

/// One admittance matrix contribution: (row, col, value) in solver ids.
pub(crate) type Triplet = (usize, usize, Complex64);

/// Stamping contract shared by every element family.
///
/// Inactive elements contribute nothing. An active element pointing at a
/// deactivated bus is a modelling error caught here, at assembly time.
pub(crate) trait Element {
    /// Append admittance contributions. `ac = false` stamps the linearized
    /// susceptance-only model used by the DC approximation.
    fn fill_ybus(
        &self,
        _triplets: &mut Vec<Triplet>,
        _ac: bool,
        _bus_map: &BusIndexMap,
        _sn_mva: f64,
    ) -> Result<()> {
        Ok(())
    }

    /// Add the net complex power injection at each endpoint, in per unit.
    /// For DC only the active part is stamped.
    fn fill_sbus(
        &self,
        _s_bus: &mut [Complex64],
        _ac: bool,
        _bus_map: &BusIndexMap,
        _sn_mva: f64,
    ) -> Result<()> {
        Ok(())
    }

    /// Mark voltage-controlled buses. Only generators contribute.
    fn fill_pv(
        &self,
        _pv: &mut Vec<usize>,
        _added: &mut [bool],
        _slack_bus_solver: usize,
        _bus_map: &BusIndexMap,
    ) -> Result<()> {
        Ok(())
    }
}

/// Post-solve quantities at one end of a branch element.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BranchRes {
    pub p_mw: f64,
    pub q_mvar: f64,
    pub v_kv: f64,
    pub a_ka: f64,
}

/// Post-solve quantities of a single-bus injection element.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InjectionRes {
    pub p_mw: f64,
    pub q_mvar: f64,
    pub v_kv: f64,
}

/// Current magnitude in kA from apparent power (MVA) and voltage (kV).
pub(crate) fn amps_ka(p_mw: f64, q_mvar: f64, v_kv: f64) -> f64 {
    if v_kv <= 0.0 {
        return 0.0;
    }
    (p_mw * p_mw + q_mvar * q_mvar).sqrt() / (3.0_f64.sqrt() * v_kv)
}

/// Resolve the solver id of an element endpoint, rejecting active elements
/// on deactivated buses.
pub(crate) fn solver_bus(
    bus_map: &BusIndexMap,
    element: &'static str,
    id: usize,
    bus: usize,
) -> Result<usize> {
    bus_map
        .solver_id(bus)
        .ok_or(Error::DisconnectedBusReferenced { element, id, bus })
}

pub(crate) fn check_id(len: usize, element: &'static str, id: usize) -> Result<()> {
    if id < len {
        Ok(())
    } else {
        Err(Error::InvalidId { element, id })
    }
}

pub(crate) fn check_bus(n_bus: usize, element: &'static str, bus: usize) -> Result<()> {
    if bus < n_bus {
        Ok(())
    } else {
        Err(Error::InvalidId { element, id: bus })
    }
}

/// Equal-length guard for the parallel parameter vectors of `init_*` calls.
pub(crate) fn check_init_len(expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(Error::InputSizeMismatch { expected, got })
    }
}
