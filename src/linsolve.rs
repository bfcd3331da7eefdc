use rsparse::data::Trpl;

use crate::error::{Error, Result};

/// Seam between the power-flow iterations and the sparse linear algebra.
/// `a` is a square matrix in compressed-column form.
pub(crate) trait LinearSolver {
    fn solve(
        &self,
        n: usize,
        rowidx: &[usize],
        colptr: &[usize],
        values: &[f64],
        b: &mut Vec<f64>,
    ) -> Result<()>;
}

/// Sparse LU with approximate-minimum-degree column ordering.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LuSolver;

impl LinearSolver for LuSolver {
    fn solve(
        &self,
        n: usize,
        rowidx: &[usize],
        colptr: &[usize],
        values: &[f64],
        b: &mut Vec<f64>,
    ) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let mut a = Trpl::<f64>::new();
        a.m = n;
        a.n = n;
        for col in 0..n {
            for p in colptr[col]..colptr[col + 1] {
                a.append(rowidx[p], col, values[p]);
            }
        }
        a.sum_dupl();
        let a = a.to_sprs();

        // order 2: amd on S'*S, the LU-flavoured column ordering
        rsparse::lusol(&a, b, 2, 1e-6).map_err(|e| Error::Sparse(format!("{:?}", e)))?;

        if b.iter().any(|x| !x.is_finite()) {
            return Err(Error::Sparse("non-finite solution".to_string()));
        }
        Ok(())
    }
}
