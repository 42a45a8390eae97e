//! Hessian-correction strategies (§4.A): applied to intermediate and
//! event-time cost Hessians only when the outer search strategy is
//! line-search (§4.C); Levenberg-Marquardt instead injects regularisation
//! terms at the Riccati step.

use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};

use crate::linalg::uut::min_eigenvalue_symmetric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HessianCorrection {
    DiagonalShift,
    CholeskyModification,
    EigenvalueModification,
}

impl Default for HessianCorrection {
    fn default() -> Self {
        HessianCorrection::EigenvalueModification
    }
}

/// Apply `strategy` to `c_uu` so that the result is PD with minimum
/// eigenvalue at least `epsilon`.
pub fn correct_hessian(c_uu: &DMatrix<f64>, strategy: HessianCorrection, epsilon: f64) -> DMatrix<f64> {
    match strategy {
        HessianCorrection::DiagonalShift => diagonal_shift(c_uu, epsilon),
        HessianCorrection::CholeskyModification => cholesky_modification(c_uu, epsilon),
        HessianCorrection::EigenvalueModification => eigenvalue_modification(c_uu, epsilon),
    }
}

/// Add `eps * I` repeatedly (doubling) until the result is PD.
fn diagonal_shift(c_uu: &DMatrix<f64>, epsilon: f64) -> DMatrix<f64> {
    let n = c_uu.nrows();
    let mut eps = epsilon;
    loop {
        let candidate = c_uu + DMatrix::identity(n, n) * eps;
        if nalgebra::Cholesky::new(candidate.clone()).is_some() {
            return candidate;
        }
        eps *= 2.0;
    }
}

/// A modified Cholesky factorisation that clamps negative pivots to
/// `epsilon`, reassembling `L D L^T` with `D` floored at `epsilon`.
fn cholesky_modification(c_uu: &DMatrix<f64>, epsilon: f64) -> DMatrix<f64> {
    let n = c_uu.nrows();
    let mut a = c_uu.clone();
    let mut l = DMatrix::<f64>::identity(n, n);
    let mut d = vec![0.0; n];
    for j in 0..n {
        let mut sum = a[(j, j)];
        for k in 0..j {
            sum -= l[(j, k)] * l[(j, k)] * d[k];
        }
        d[j] = sum.max(epsilon);
        for i in (j + 1)..n {
            let mut sum = a[(i, j)];
            for k in 0..j {
                sum -= l[(i, k)] * l[(j, k)] * d[k];
            }
            l[(i, j)] = sum / d[j];
        }
    }
    // Reassemble: corrected = L D L^T.
    let d_mat = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(d));
    let corrected = &l * d_mat * l.transpose();
    // guard against asymmetry from floating point roundoff
    a.copy_from(&((&corrected + corrected.transpose()) * 0.5));
    a
}

/// Clamp eigenvalues of `c_uu` from below by `epsilon`.
fn eigenvalue_modification(c_uu: &DMatrix<f64>, epsilon: f64) -> DMatrix<f64> {
    let eigen = SymmetricEigen::new(c_uu.clone());
    let clamped = eigen.eigenvalues.map(|lambda| lambda.max(epsilon));
    &eigen.eigenvectors * DMatrix::from_diagonal(&clamped) * eigen.eigenvectors.transpose()
}

/// Whether `m` is PD up to `tolerance` (smallest eigenvalue above
/// `-tolerance`); used by the `checkNumericalStability` validation path.
pub fn is_psd(m: &DMatrix<f64>, tolerance: f64) -> bool {
    min_eigenvalue_symmetric(m) >= -tolerance
}
