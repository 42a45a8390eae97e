//! Constraint range/null projectors (§4.A), built from the UUT factor of
//! `H^-1` so every projector respects the Hamiltonian metric rather than
//! the Euclidean one.

use nalgebra::{DMatrix, SymmetricEigen};

use crate::error::NumericalError;

#[derive(Debug, Clone)]
pub struct ConstraintProjections {
    /// `P_R = H^-1 D^T (D H^-1 D^T)^-1`, shape `n_u x m`. Empty (`n_u x 0`)
    /// when there is no constraint at this node.
    pub range_projector: DMatrix<f64>,
    /// `P_N`, shape `n_u x (n_u - m)`, satisfying `P_N^T H P_N = I`.
    pub null_projector: DMatrix<f64>,
}

/// Build the range and null projectors for constraint Jacobian `d` (`g_u`,
/// `m x n_u`) given the UUT factor `u` of `H^-1` (`n_u x n_u`).
///
/// When `m == 0` the range projector is empty and the null projector is `u`
/// itself (§4.A).
pub fn constraint_projections(
    u: &DMatrix<f64>,
    d: Option<&DMatrix<f64>>,
    node: usize,
) -> Result<ConstraintProjections, NumericalError> {
    let n_u = u.nrows();
    let m = d.map(|d| d.nrows()).unwrap_or(0);

    if m == 0 {
        return Ok(ConstraintProjections {
            range_projector: DMatrix::zeros(n_u, 0),
            null_projector: u.clone(),
        });
    }
    let d = d.unwrap();

    // A = D U; the constraint in the H^-1-conditioned coordinate z (u = U z)
    // reads A z = 0.
    let a = d * u;
    let gram = &a * a.transpose();
    let gram_inv = gram
        .clone()
        .try_inverse()
        .ok_or(NumericalError::ConstraintNotFullRowRank { node })?;

    // Minimum-Euclidean-norm pseudoinverse of A: A^+ = A^T (A A^T)^-1.
    let a_pinv = a.transpose() * &gram_inv;
    // P_R = U A^+, since H^-1 D^T (D H^-1 D^T)^-1 = U (U^T D^T) (D U U^T D^T)^-1
    //                                              = U A^T (A A^T)^-1 = U A^+.
    let range_projector = u * &a_pinv;

    // Euclidean-orthogonal projector onto ker(A), in z-coordinates.
    let identity = DMatrix::<f64>::identity(n_u, n_u);
    let null_projector_z = &identity - &a_pinv * &a;
    // This projector is symmetric and idempotent with eigenvalues in {0,1};
    // eigenvectors at eigenvalue 1 are an Euclidean-orthonormal basis of
    // ker(A). Mapping back through U makes them H-orthonormal.
    let eigen = SymmetricEigen::new(null_projector_z);
    let mut order: Vec<usize> = (0..n_u).collect();
    order.sort_by(|&i, &j| eigen.eigenvalues[j].partial_cmp(&eigen.eigenvalues[i]).unwrap());
    let rank = n_u - m;
    let mut basis_z = DMatrix::zeros(n_u, rank);
    for (col, &i) in order.iter().take(rank).enumerate() {
        basis_z.set_column(col, &eigen.eigenvectors.column(i));
    }
    let null_projector = u * basis_z;

    Ok(ConstraintProjections {
        range_projector,
        null_projector,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::uut::uut_inverse;
    use nalgebra::dmatrix;

    #[test]
    fn unconstrained_null_projector_is_u() {
        let h = dmatrix![2.0, 0.0; 0.0, 3.0];
        let u = uut_inverse(&h, 0).unwrap();
        let proj = constraint_projections(&u, None, 0).unwrap();
        assert_eq!(proj.range_projector.ncols(), 0);
        assert!((proj.null_projector.clone() - &u).abs().max() < 1e-9);
    }

    #[test]
    fn null_projector_is_h_orthonormal() {
        let h = dmatrix![4.0, 0.5, 0.0; 0.5, 3.0, 0.2; 0.0, 0.2, 2.0];
        let u = uut_inverse(&h, 0).unwrap();
        let d = dmatrix![1.0, 0.0, 1.0];
        let proj = constraint_projections(&u, Some(&d), 0).unwrap();
        let should_be_i = proj.null_projector.transpose() * &h * &proj.null_projector;
        let identity = DMatrix::identity(should_be_i.nrows(), should_be_i.ncols());
        assert!((should_be_i - identity).abs().max() < 1e-6);
        // D * P_N == 0
        let should_be_zero = &d * &proj.null_projector;
        assert!(should_be_zero.abs().max() < 1e-9);
    }
}
