//! Per-node constraint projection and Riccati modification (§4.D).
//!
//! Given the current `S_+` and the raw (unprojected) model data at a node,
//! this computes the Hamiltonian Hessian, its range/null projectors, the
//! change-of-variables terms `(P_x, u_0)`, and rewrites the model into the
//! reduced, unconstrained coordinate `u_tilde`. Regularisation deltas are
//! supplied by the active search strategy (§4.F) through
//! [`crate::search::SearchStrategy::deltas`].

use nalgebra::{DMatrix, DVector};

use crate::error::NumericalError;
use crate::linalg::{constraint_projections, correct_hessian, uut_inverse};
use crate::model::{ModelData, RiccatiModification};
use crate::search::SearchStrategy;

/// The `(delta_Q_m, delta_G_v, delta_G_m)` regularisation terms a search
/// strategy injects into the backward pass (§4.D step 4); see
/// [`SearchStrategy::deltas`].
#[derive(Debug, Clone)]
pub struct Deltas {
    pub delta_q_m: DMatrix<f64>,
    pub delta_g_v: DVector<f64>,
    pub delta_g_m: DMatrix<f64>,
}

impl Deltas {
    pub fn zero(reduced_dim: usize, state_dim: usize) -> Self {
        Self {
            delta_q_m: DMatrix::zeros(state_dim, state_dim),
            delta_g_v: DVector::zeros(reduced_dim),
            delta_g_m: DMatrix::zeros(reduced_dim, reduced_dim),
        }
    }
}

/// The projected (reduced) model data together with the modification that
/// produced it and the terms needed to un-project the controller (§4.E).
pub struct ProjectedNode {
    pub projected_model: ModelData,
    pub modification: RiccatiModification,
    /// `P_x = -P_R g_x`, maps state deviation to the particular-solution
    /// control offset.
    pub p_x: DMatrix<f64>,
    /// `u_0 = -P_R g`, the particular solution satisfying the constraint at
    /// the nominal point.
    pub u_0: DVector<f64>,
}

/// Project and regularise one interior node (§4.D).
pub fn project_node(
    node: usize,
    raw: &ModelData,
    s_plus: &DMatrix<f64>,
    strategy: &SearchStrategy,
) -> Result<ProjectedNode, NumericalError> {
    let f_u = raw.f_u.as_ref().expect("interior node must carry f_u");
    let c_uu = raw.c_uu.as_ref().expect("interior node must carry c_uu");
    let c_ux = raw.c_ux.as_ref().expect("interior node must carry c_ux");
    let c_u = raw.c_u.as_ref().expect("interior node must carry c_u");
    let n_u = f_u.ncols();
    let n_x = f_u.nrows();

    let c_uu_corrected = match strategy.hessian_correction() {
        Some(correction) => correct_hessian(c_uu, correction, 1e-8),
        None => c_uu.clone(),
    };

    // H = c_uu + f_u^T S_+ f_u (Hamiltonian Hessian, §4.D step 1).
    let h = &c_uu_corrected + f_u.transpose() * s_plus * f_u;
    let u = uut_inverse(&h, node)?;
    let d = raw.g_u.as_ref();
    let projections = constraint_projections(&u, d, node)?;
    let m = d.map(|d| d.nrows()).unwrap_or(0);
    let reduced_dim = n_u - m;

    // Change of variables u = P_N u~ + P_x x + u_0.
    let (p_x, u_0) = if m == 0 {
        (DMatrix::zeros(n_u, n_x), DVector::zeros(n_u))
    } else {
        let g_x = raw.g_x.as_ref().expect("constrained node must carry g_x");
        let g = raw.g.as_ref().expect("constrained node must carry g");
        (
            -&projections.range_projector * g_x,
            -&projections.range_projector * g,
        )
    };

    let p_n = &projections.null_projector;
    // Rewrite the model in u~: substitute u = P_N u~ + (P_x x + u_0) and
    // collect terms.
    let f_x_reduced = &raw.f_x + f_u * &p_x;
    let f_reduced = &raw.f + f_u * &u_0;
    let f_u_reduced = f_u * p_n;

    let c_x_reduced = &raw.c_x + c_ux.transpose() * &u_0 + p_x.transpose() * c_u + p_x.transpose() * c_uu_corrected.clone() * &u_0;
    let c_xx_reduced = &raw.c_xx
        + p_x.transpose() * c_ux
        + c_ux.transpose() * &p_x
        + p_x.transpose() * &c_uu_corrected * &p_x;
    let c_u_reduced = p_n.transpose() * (c_u + &c_uu_corrected * &u_0);
    let c_ux_reduced = p_n.transpose() * (c_ux + &c_uu_corrected * &p_x);
    let c_uu_reduced = p_n.transpose() * &c_uu_corrected * p_n;

    let deltas = strategy.deltas(node, reduced_dim, n_x);

    let projected_model = ModelData {
        f: f_reduced,
        f_x: f_x_reduced,
        f_u: Some(f_u_reduced),
        dynamics_bias: raw.dynamics_bias.clone(),
        c: raw.c,
        c_x: c_x_reduced,
        c_u: Some(c_u_reduced),
        c_xx: c_xx_reduced,
        c_ux: Some(c_ux_reduced),
        c_uu: Some(c_uu_reduced),
        g: None,
        g_x: None,
        g_u: None,
        noise_covariance: raw.noise_covariance.clone(),
    };

    let modification = RiccatiModification {
        constraint_range_projector: projections.range_projector,
        constraint_null_projector: projections.null_projector.clone(),
        hamiltonian_hessian: h,
        delta_q_m: deltas.delta_q_m,
        delta_g_v: deltas.delta_g_v,
        delta_g_m: deltas.delta_g_m,
    };

    Ok(ProjectedNode {
        projected_model,
        modification,
        p_x,
        u_0,
    })
}
