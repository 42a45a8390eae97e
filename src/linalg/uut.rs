//! `H^-1 = U U^T` via the Cholesky factor of `H`, not by a separate
//! Cholesky-of-the-inverse: with `H = L L^T`, `U := L^-T` satisfies
//! `U U^T = L^-T L^-1 = (L L^T)^-1 = H^-1` and is cheaper than inverting
//! `H` first.

use nalgebra::DMatrix;

use crate::error::NumericalError;

/// Given symmetric PD `h`, return `U` such that `H^-1 = U U^T`.
///
/// Fails (the caller is expected to raise a Hessian-correction request)
/// when `h` is not PD.
pub fn uut_inverse(h: &DMatrix<f64>, node: usize) -> Result<DMatrix<f64>, NumericalError> {
    let chol = nalgebra::Cholesky::new(h.clone()).ok_or(NumericalError::HamiltonianHessianNotPd {
        node,
        min_eigenvalue: min_eigenvalue_symmetric(h),
    })?;
    let l = chol.l();
    let l_inv = l
        .try_inverse()
        .ok_or(NumericalError::HamiltonianHessianNotPd {
            node,
            min_eigenvalue: min_eigenvalue_symmetric(h),
        })?;
    Ok(l_inv.transpose())
}

/// Smallest eigenvalue of a symmetric matrix, used only for diagnostics
/// (error messages), never on the hot path.
pub fn min_eigenvalue_symmetric(m: &DMatrix<f64>) -> f64 {
    let sym = nalgebra::SymmetricEigen::new(m.clone());
    sym.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min)
}
