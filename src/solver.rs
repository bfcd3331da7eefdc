use std::time::Instant;

use num_complex::Complex64;
use sparsetools::csc::CSC;
use sparsetools::csr::CSR;

use crate::dc::dc_pf;
use crate::error::{Error, Result};
use crate::linsolve::LuSolver;
use crate::newton::newton_pf;

/// Available power-flow methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverType {
    /// Full Newton-Raphson in polar coordinates, sparse-LU linear step.
    SparseLu,
    /// Linearized DC approximation, one sparse solve.
    Dc,
}

/// The solver iterate and its by-products, persistent across solves so a
/// later call can warm-start from the previous voltage profile. Sized in
/// solver (dense, connected-only) bus ids. Cleared on reset.
#[derive(Default)]
pub struct SolverState {
    pub(crate) v: Vec<Complex64>,
    pub(crate) va: Vec<f64>,
    pub(crate) vm: Vec<f64>,
    pub(crate) j: Option<CSC<usize, f64>>,
    pub(crate) iterations: usize,
    pub(crate) converged: bool,
    pub(crate) error: Option<Error>,
    pub(crate) comp_time: f64,
}

/// Dispatches a power-flow computation to the selected method and owns the
/// resulting state.
pub struct Solver {
    kind: SolverType,
    lu: LuSolver,
    pub(crate) state: SolverState,
}

impl Default for Solver {
    fn default() -> Self {
        Self {
            kind: SolverType::SparseLu,
            lu: LuSolver,
            state: SolverState::default(),
        }
    }
}

impl Solver {
    pub fn available_solvers() -> Vec<SolverType> {
        vec![SolverType::SparseLu, SolverType::Dc]
    }

    pub fn get_type(&self) -> SolverType {
        self.kind
    }

    pub(crate) fn change_type(&mut self, kind: SolverType) {
        self.kind = kind;
    }

    pub(crate) fn reset(&mut self) {
        self.state = SolverState::default();
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn compute_pf(
        &mut self,
        y_bus: &CSR<usize, Complex64>,
        v0: &[Complex64],
        s_bus: &[Complex64],
        pv: &[usize],
        pq: &[usize],
        slack_bus_solver: usize,
        max_iter: usize,
        tol: f64,
    ) -> Result<bool> {
        let t0 = Instant::now();
        self.state.error = None;
        self.state.converged = false;

        let converged = match self.kind {
            SolverType::SparseLu => newton_pf(
                y_bus,
                s_bus,
                v0,
                pv,
                pq,
                max_iter,
                tol,
                &self.lu,
                &mut self.state,
            )?,
            SolverType::Dc => dc_pf(y_bus, s_bus, v0, slack_bus_solver, &self.lu, &mut self.state)?,
        };

        self.state.converged = converged;
        self.state.comp_time = t0.elapsed().as_secs_f64();
        Ok(converged)
    }

    /// Recompute the polar decomposition after the voltage vector was
    /// patched in place (generator setpoint overlay after a DC solve).
    pub(crate) fn refresh_polar(&mut self) {
        self.state.va = self.state.v.iter().map(|v| v.arg()).collect();
        self.state.vm = self.state.v.iter().map(|v| v.norm()).collect();
    }

    pub fn get_v(&self) -> &[Complex64] {
        &self.state.v
    }

    pub fn get_va(&self) -> &[f64] {
        &self.state.va
    }

    pub fn get_vm(&self) -> &[f64] {
        &self.state.vm
    }

    pub fn get_j(&self) -> Option<&CSC<usize, f64>> {
        self.state.j.as_ref()
    }

    pub fn iterations(&self) -> usize {
        self.state.iterations
    }

    pub fn converged(&self) -> bool {
        self.state.converged
    }

    /// Wall-clock time of the last `compute_pf` call, in seconds.
    pub fn computation_time(&self) -> f64 {
        self.state.comp_time
    }

    /// The failure recorded by the last run, if it did not converge.
    pub fn error(&self) -> Option<&Error> {
        self.state.error.as_ref()
    }
}
