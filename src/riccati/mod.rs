//! The discrete-time Riccati step (§4.B): one backward step for either the
//! reduced (iLQR) form or the risk-sensitive (iLEG) form, operating on the
//! already-projected model data produced by [`crate::modification`].

use nalgebra::{DMatrix, DVector};

use crate::error::NumericalError;
use crate::model::{symmetrize, ModelData, RiccatiModification, RiccatiStepResult, ValueFunction};

/// Selects between the reduced (iLQR) and risk-sensitive (iLEG) Riccati
/// forms (§4.B); corresponds to the `algorithm` setting (`ILQR` / `SLQ`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiccatiForm {
    /// Reduced form, assumes the projected Hamiltonian Hessian is PD.
    Reduced,
    /// Risk-sensitive form with coefficient `theta`.
    RiskSensitive { risk_sensitive_coefficient: f64 },
}

/// One step of the discrete-time Riccati difference equation.
pub struct RiccatiStep {
    pub form: RiccatiForm,
}

impl RiccatiStep {
    pub fn new(form: RiccatiForm) -> Self {
        Self { form }
    }

    /// Interior (non-event) node: full dynamics + cost + optional
    /// regularisation, producing the projected controller increment and the
    /// propagated value function.
    pub fn compute_interior(
        &self,
        node: usize,
        projected: &ModelData,
        modification: &RiccatiModification,
        value_next: &ValueFunction,
    ) -> Result<RiccatiStepResult, NumericalError> {
        let (s_plus, s_v_plus, s_next) = match self.form {
            RiccatiForm::Reduced => (
                value_next.s_m.clone(),
                value_next.s_v.clone(),
                value_next.s,
            ),
            RiccatiForm::RiskSensitive {
                risk_sensitive_coefficient,
            } => risk_adjust(
                projected,
                value_next,
                risk_sensitive_coefficient,
                node,
            )?,
        };

        let f_u = projected
            .f_u
            .as_ref()
            .expect("interior node must carry f_u");
        let c_uu = projected
            .c_uu
            .as_ref()
            .expect("interior node must carry c_uu");
        let c_ux = projected
            .c_ux
            .as_ref()
            .expect("interior node must carry c_ux");
        let c_u = projected.c_u.as_ref().expect("interior node must carry c_u");

        let h_hat = c_uu + f_u.transpose() * &s_plus * f_u + &modification.delta_g_m;
        let g_m_hat = c_ux + f_u.transpose() * &s_plus * &projected.f_x;
        let g_v_hat =
            c_u + f_u.transpose() * (&s_plus * &projected.f + &s_v_plus) + &modification.delta_g_v;

        let chol = nalgebra::Cholesky::new(h_hat.clone()).ok_or(
            NumericalError::HamiltonianHessianNotPd {
                node,
                min_eigenvalue: crate::linalg::uut::min_eigenvalue_symmetric(&h_hat),
            },
        )?;
        let gain_tilde = -chol.solve(&g_m_hat);
        let bias_tilde = -chol.solve(&g_v_hat);

        let s_m = symmetrize(
            &(&projected.c_xx
                + projected.f_x.transpose() * &s_plus * &projected.f_x
                + gain_tilde.transpose() * &h_hat * &gain_tilde
                + gain_tilde.transpose() * &g_m_hat
                + g_m_hat.transpose() * &gain_tilde
                + &modification.delta_q_m),
        );
        // `gain_tilde^T g_v_hat` and `gain_tilde^T h_hat bias_tilde` cancel
        // identically (bias_tilde solves h_hat * bias_tilde = -g_v_hat), so
        // neither term appears here; only the `g_m_hat^T bias_tilde`
        // cross-term from Vxx's expansion survives.
        let s_v = &projected.c_x
            + projected.f_x.transpose() * (&s_plus * &projected.f + &s_v_plus)
            + g_m_hat.transpose() * &bias_tilde;
        let s = s_next
            + projected.c
            + s_v_plus.dot(&projected.f)
            + 0.5 * (projected.f.transpose() * &s_plus * &projected.f)[(0, 0)]
            + 0.5 * bias_tilde.dot(&g_v_hat);

        Ok(RiccatiStepResult {
            gain_tilde,
            bias_tilde,
            value_function: ValueFunction { s, s_v, s_m },
        })
    }

    /// Event (pre-jump) node: only the jump cost and jump-map Jacobian
    /// participate; there is no control input (§4.B "Event steps").
    pub fn compute_event(
        &self,
        node: usize,
        projected: &ModelData,
        value_next: &ValueFunction,
    ) -> Result<ValueFunction, NumericalError> {
        let (s_plus, s_v_plus, s_next) = match self.form {
            RiccatiForm::Reduced => (
                value_next.s_m.clone(),
                value_next.s_v.clone(),
                value_next.s,
            ),
            RiccatiForm::RiskSensitive {
                risk_sensitive_coefficient,
            } => risk_adjust(projected, value_next, risk_sensitive_coefficient, node)?,
        };
        let s_m = symmetrize(&(&projected.c_xx + projected.f_x.transpose() * &s_plus * &projected.f_x));
        let s_v = &projected.c_x + projected.f_x.transpose() * (&s_plus * &projected.f + &s_v_plus);
        let s = s_next
            + projected.c
            + s_v_plus.dot(&projected.f)
            + 0.5 * (projected.f.transpose() * &s_plus * &projected.f)[(0, 0)];
        Ok(ValueFunction { s, s_v, s_m })
    }
}

/// §4.B risk-sensitive form: propagate `(S_+, S_v+, s_+)` through the
/// stochastic-cost perturbation `M = (I - theta S_+ Sigma)^-1`.
fn risk_adjust(
    projected: &ModelData,
    value_next: &ValueFunction,
    theta: f64,
    node: usize,
) -> Result<(DMatrix<f64>, DVector<f64>, f64), NumericalError> {
    let n = value_next.s_m.nrows();
    let sigma = projected
        .noise_covariance
        .clone()
        .unwrap_or_else(|| DMatrix::zeros(n, n));
    let i_minus = DMatrix::<f64>::identity(n, n) - &value_next.s_m * &sigma * theta;
    let m = i_minus
        .clone()
        .try_inverse()
        .ok_or(NumericalError::RiskSensitiveMatrixSingular { node })?;

    let s_plus_rs = &m * &value_next.s_m;
    let s_v_plus_rs = &m * (&value_next.s_v + &value_next.s_m * &sigma * &projected.f);
    let log_det_m = -i_minus
        .determinant()
        .abs()
        .ln();
    let s_next_rs = value_next.s
        + 0.5 * theta * value_next.s_v.dot(&(&sigma * &value_next.s_v))
        + log_det_m / theta;
    Ok((s_plus_rs, s_v_plus_rs, s_next_rs))
}
