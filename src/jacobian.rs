use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csc::CSC;
use sparsetools::csr::{CCSR, CSR};

use crate::error::{Error, Result};

pub(crate) const J: Complex64 = Complex64 { re: 0.0, im: 1.0 };

/// Computes partial derivatives of the bus power injections w.r.t. voltage
/// angle and magnitude (polar coordinates).
///
///   dSbus/dVa = j * diagV * conj(diagIbus - Ybus * diagV)
///   dSbus/dVm = diagV * conj(Ybus * diagVnorm) + conj(diagIbus) * diagVnorm
pub(crate) fn d_sbus_d_v(
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
) -> (CSR<usize, Complex64>, CSR<usize, Complex64>) {
    let i_bus = y_bus * v;

    let diag_v = CSR::<usize, Complex64>::with_diagonal(v.to_vec());
    let diag_i_bus = CSR::<usize, Complex64>::with_diagonal(i_bus);

    let v_norm = v
        .iter()
        .map(|v| v / Complex64::new(v.norm(), 0.0))
        .collect();
    let diag_v_norm = CSR::<usize, Complex64>::with_diagonal(v_norm);

    let mut d_sbus_d_va = &diag_v * (&diag_i_bus - y_bus * &diag_v).conj() * J;
    let d_sbus_d_vm = &diag_v * (y_bus * &diag_v_norm).conj() + diag_i_bus.conj() * &diag_v_norm;

    d_sbus_d_va.sort_indexes();

    (d_sbus_d_va, d_sbus_d_vm)
}

/// Forms the reduced power-flow Jacobian used by the Newton updates:
///
/// ```text
///     J = | dP/dVa[pvpq, pvpq]  dP/dVm[pvpq, pq] |
///         | dQ/dVa[pq,   pvpq]  dQ/dVm[pq,   pq] |
/// ```
pub(crate) fn build_jacobian(
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
    pv_pq: &[usize],
    pq: &[usize],
) -> Result<CSC<usize, f64>> {
    let (d_sbus_d_va, d_sbus_d_vm) = d_sbus_d_v(y_bus, v);

    let j11 = d_sbus_d_va
        .select(Some(pv_pq), Some(pv_pq))
        .map_err(|e| Error::Sparse(e.to_string()))?
        .real();
    if pq.is_empty() {
        // every non-slack bus is voltage controlled
        return Ok(j11.to_csc());
    }
    let j12 = d_sbus_d_vm
        .select(Some(pv_pq), Some(pq))
        .map_err(|e| Error::Sparse(e.to_string()))?
        .real();
    let j21 = d_sbus_d_va
        .select(Some(pq), Some(pv_pq))
        .map_err(|e| Error::Sparse(e.to_string()))?
        .imag();
    let j22 = d_sbus_d_vm
        .select(Some(pq), Some(pq))
        .map_err(|e| Error::Sparse(e.to_string()))?
        .imag();

    let jac = Coo::compose([
        [&j11.to_coo(), &j12.to_coo()],
        [&j21.to_coo(), &j22.to_coo()],
    ])
    .map_err(|e| Error::Sparse(e.to_string()))?
    .to_csc();

    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_from_csc(a: &CSC<usize, f64>, m: usize, n: usize) -> Vec<Vec<f64>> {
        let mut d = vec![vec![0.0; n]; m];
        let colptr = a.colptr();
        let rowidx = a.rowidx();
        let values = a.data();
        for col in 0..n {
            for p in colptr[col]..colptr[col + 1] {
                d[rowidx[p]][col] += values[p];
            }
        }
        d
    }

    fn injections(y_bus: &CSR<usize, Complex64>, va: &[f64], vm: &[f64]) -> Vec<Complex64> {
        let v: Vec<Complex64> = va
            .iter()
            .zip(vm)
            .map(|(&a, &m)| Complex64::from_polar(m, a))
            .collect();
        let i_bus = y_bus * &v;
        (0..v.len()).map(|k| v[k] * i_bus[k].conj()).collect()
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        // 3-bus loop with unequal admittances
        let mut y = Coo::<usize, Complex64>::with_size(3, 3);
        let y01 = Complex64::new(1.0, -8.0);
        let y12 = Complex64::new(0.8, -4.0);
        let y02 = Complex64::new(0.5, -2.5);
        for &(i, j, ys) in &[(0usize, 1usize, y01), (1, 2, y12), (0, 2, y02)] {
            y.push(i, i, ys);
            y.push(j, j, ys);
            y.push(i, j, -ys);
            y.push(j, i, -ys);
        }
        let y_bus = y.to_csr();

        let va = vec![0.0, -0.04, -0.08];
        let vm = vec![1.02, 0.99, 0.97];
        let v: Vec<Complex64> = va
            .iter()
            .zip(&vm)
            .map(|(&a, &m)| Complex64::from_polar(m, a))
            .collect();

        let pv_pq = vec![1, 2];
        let pq = vec![1, 2];
        let jac = build_jacobian(&y_bus, &v, &pv_pq, &pq).unwrap();
        let dense = dense_from_csc(&jac, 4, 4);

        let h = 1e-7;
        for (col, &b) in pv_pq.iter().enumerate() {
            // dP,dQ w.r.t. the angle at bus b
            let mut va_p = va.clone();
            let mut va_m = va.clone();
            va_p[b] += h;
            va_m[b] -= h;
            let s_p = injections(&y_bus, &va_p, &vm);
            let s_m = injections(&y_bus, &va_m, &vm);
            for (row, &r) in pv_pq.iter().enumerate() {
                let fd = (s_p[r].re - s_m[r].re) / (2.0 * h);
                assert!((dense[row][col] - fd).abs() < 1e-5);
            }
            for (row, &r) in pq.iter().enumerate() {
                let fd = (s_p[r].im - s_m[r].im) / (2.0 * h);
                assert!((dense[2 + row][col] - fd).abs() < 1e-5);
            }
        }
        for (col, &b) in pq.iter().enumerate() {
            // dP,dQ w.r.t. the magnitude at bus b
            let mut vm_p = vm.clone();
            let mut vm_m = vm.clone();
            vm_p[b] += h;
            vm_m[b] -= h;
            let s_p = injections(&y_bus, &va, &vm_p);
            let s_m = injections(&y_bus, &va, &vm_m);
            for (row, &r) in pv_pq.iter().enumerate() {
                let fd = (s_p[r].re - s_m[r].re) / (2.0 * h);
                assert!((dense[row][2 + col] - fd).abs() < 1e-5);
            }
            for (row, &r) in pq.iter().enumerate() {
                let fd = (s_p[r].im - s_m[r].im) / (2.0 * h);
                assert!((dense[2 + row][2 + col] - fd).abs() < 1e-5);
            }
        }
    }
}
