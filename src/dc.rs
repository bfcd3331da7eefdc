use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;
use std::iter::zip;

use crate::error::{Error, Result};
use crate::linsolve::LinearSolver;
use crate::solver::SolverState;

/// Solves the linearized (DC) power flow on an admittance matrix assembled
/// in susceptance-only mode.
///
/// The slack row and column are stripped from the real part of `y_bus`, the
/// remaining system is solved for the bus voltage angles, and the slack
/// angle `arg(v0[slack])` is added back to every bus. Magnitudes are left at
/// 1 pu; the caller overlays generator setpoints afterwards. A factorization
/// failure means the network is not a single connected component and is
/// recorded as [`Error::DcSingular`].
pub(crate) fn dc_pf(
    y_bus: &CSR<usize, Complex64>,
    s_bus: &[Complex64],
    v0: &[Complex64],
    slack: usize,
    lin: &dyn LinearSolver,
    state: &mut SolverState,
) -> Result<bool> {
    let n = v0.len();
    let shift = v0[slack].arg();

    let mut va = vec![shift; n];
    if n > 1 {
        // strip the slack row and column, keeping only the real part
        let mut reduced = Coo::<usize, f64>::with_size(n - 1, n - 1);
        let rowptr = y_bus.rowptr();
        let colidx = y_bus.colidx();
        let values = y_bus.data();
        for row in 0..n {
            if row == slack {
                continue;
            }
            let r = if row > slack { row - 1 } else { row };
            for p in rowptr[row]..rowptr[row + 1] {
                let col = colidx[p];
                if col == slack {
                    continue;
                }
                let c = if col > slack { col - 1 } else { col };
                reduced.push(r, c, values[p].re);
            }
        }
        let b_mat = reduced.to_csc();

        let mut theta: Vec<f64> = (0..n)
            .filter(|&k| k != slack)
            .map(|k| s_bus[k].re)
            .collect();
        if let Err(err) = lin.solve(
            b_mat.cols(),
            b_mat.rowidx(),
            b_mat.colptr(),
            b_mat.data(),
            &mut theta,
        ) {
            log::info!("dc factorization failed: {}", err);
            state.error = Some(Error::DcSingular(err.to_string()));
            return Ok(false);
        }

        for k in 0..n {
            if k != slack {
                let kk = if k > slack { k - 1 } else { k };
                va[k] = theta[kk] + shift;
            }
        }
    }

    let vm = vec![1.0; n];
    state.v = zip(&vm, &va)
        .map(|(&vm, &va)| Complex64::from_polar(vm, va))
        .collect();
    state.va = va;
    state.vm = vm;
    state.iterations = 1;
    log::debug!("dc angles: {:?}", state.va);

    Ok(true)
}
