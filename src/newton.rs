use num_complex::Complex64;
use sparsetools::csr::CSR;
use std::iter::zip;

use crate::error::{Error, Result};
use crate::jacobian::build_jacobian;
use crate::linsolve::LinearSolver;
use crate::solver::SolverState;

/// Computes the infinity norm: `max(abs(a))`
pub(crate) fn norm_inf(a: &[f64]) -> f64 {
    let mut max = f64::NEG_INFINITY;
    a.iter().for_each(|v| {
        let absvi = v.abs();
        if absvi > max {
            max = absvi
        }
    });
    max
}

/// Real mismatch vector `[Re(M) at pv u pq; Im(M) at pq]` with
/// `M = V .* conj(Ybus*V) - Sbus`.
fn mismatch(
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
    s_bus: &[Complex64],
    pv_pq: &[usize],
    pq: &[usize],
) -> Vec<f64> {
    let i_bus = y_bus * v;
    let mis: Vec<Complex64> = (0..v.len())
        .map(|k| v[k] * i_bus[k].conj() - s_bus[k])
        .collect();
    [
        pv_pq.iter().map(|&k| mis[k].re).collect::<Vec<_>>(),
        pq.iter().map(|&k| mis[k].im).collect::<Vec<_>>(),
    ]
    .concat()
}

/// Solves the power flow with a full Newton-Raphson method, using nodal
/// power balance equations and polar coordinate representation of voltages.
///
/// The initial voltage vector carries the setpoint magnitude for generator
/// buses (including the slack) and the reference angle of the slack bus,
/// as well as an initial guess for the remaining magnitudes and angles.
///
/// Returns whether the iteration converged. The iterate, its polar parts,
/// the last Jacobian and the iteration count are left in `state`; a singular
/// Jacobian or an exhausted iteration budget is recorded as `state.error`.
pub(crate) fn newton_pf(
    y_bus: &CSR<usize, Complex64>,
    s_bus: &[Complex64],
    v0: &[Complex64],
    pv: &[usize],
    pq: &[usize],
    max_iter: usize,
    tol: f64,
    lin: &dyn LinearSolver,
    state: &mut SolverState,
) -> Result<bool> {
    let pv_pq = [pv, pq].concat();

    let mut converged = false;
    let mut i = 0;
    let mut v = v0.to_vec();
    let mut va: Vec<f64> = v.iter().map(|v| v.arg()).collect();
    let mut vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();

    // set up indexing for updating V
    let npv = pv.len();
    let npq = pq.len();
    let (j1, j2) = (0, npv); // j1:j2 - V angle of pv buses
    let (j3, j4) = (j2, j2 + npq); // j3:j4 - V angle of pq buses
    let (j5, j6) = (j4, j4 + npq); // j5:j6 - V mag of pq buses

    // evaluate F(x0)
    let mut f = mismatch(y_bus, &v, s_bus, &pv_pq, pq);
    let norm_f = norm_inf(&f);
    if norm_f < tol {
        converged = true;
        log::info!("converged on the initial point");
    }
    log::debug!("norm_f0: {}", norm_f);

    while !converged && i < max_iter {
        i += 1;

        let jac = build_jacobian(y_bus, &v, &pv_pq, pq)?;

        // compute update step: J * dx = -F
        let mut dx: Vec<f64> = f.iter().map(|f| -f).collect();
        if let Err(err) = lin.solve(jac.cols(), jac.rowidx(), jac.colptr(), jac.data(), &mut dx)
        {
            log::info!("jacobian factorization failed at iteration {}: {}", i, err);
            state.error = Some(Error::JacobianSingular(err.to_string()));
            state.v = v;
            state.va = va;
            state.vm = vm;
            state.j = Some(jac);
            state.iterations = i;
            return Ok(false);
        }

        // update voltage
        for (k, j) in (j1..j2).enumerate() {
            va[pv[k]] += dx[j];
        }
        for (k, j) in (j3..j4).enumerate() {
            va[pq[k]] += dx[j];
        }
        for (k, j) in (j5..j6).enumerate() {
            vm[pq[k]] += dx[j];
        }

        // update Vm and Va again in case we wrapped around with a negative Vm
        v = zip(&vm, &va)
            .map(|(&vm, &va)| Complex64::from_polar(vm, va))
            .collect();
        va = v.iter().map(|v| v.arg()).collect();
        vm = v.iter().map(|v| v.norm()).collect();

        f = mismatch(y_bus, &v, s_bus, &pv_pq, pq);
        let norm_f = norm_inf(&f);
        log::debug!("norm_f{}: {}", i, norm_f);
        if norm_f < tol {
            converged = true;
            log::info!(
                "newton-raphson power flow converged in {} iterations",
                i
            );
        }
        state.j = Some(jac);
    }

    if !converged {
        log::info!(
            "newton-raphson power flow did not converge in {} iterations",
            i
        );
        state.error = Some(Error::MaxIterExceeded(max_iter));
    }
    state.v = v;
    state.va = va;
    state.vm = vm;
    state.iterations = i;

    Ok(converged)
}
