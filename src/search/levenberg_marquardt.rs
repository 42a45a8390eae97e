//! Levenberg-Marquardt strategy (§4.F): regularises the Riccati step
//! directly instead of scaling the feed-forward increment.

use nalgebra::{DMatrix, DVector};

use crate::error::NumericalError;
use crate::linalg::HessianCorrection;
use crate::modification::Deltas;
use crate::settings::LevenbergMarquardtSettings;

use super::{evaluate_candidate, SearchContext, SearchOutcome, StepOutcome};

pub struct LevenbergMarquardt {
    pub settings: LevenbergMarquardtSettings,
    mu: f64,
    consecutive_rejections: usize,
}

impl LevenbergMarquardt {
    pub fn new(settings: LevenbergMarquardtSettings) -> Self {
        let mu = settings.mu_factor;
        Self {
            settings,
            mu,
            consecutive_rejections: 0,
        }
    }

    pub fn current_mu(&self) -> f64 {
        self.mu
    }

    pub fn consecutive_rejections(&self) -> usize {
        self.consecutive_rejections
    }

    /// §4.B: the Riccati modification adds `mu * I` to the Hamiltonian
    /// Hessian `H_hat` (i.e. `delta_g_m`, which `riccati::compute_interior`
    /// folds into `H_hat` directly); `delta_q_m` stays state-dimensioned
    /// zero since this strategy does not regularise the value-function
    /// curvature directly.
    pub fn deltas(&self, _node: usize, reduced_dim: usize, state_dim: usize) -> Deltas {
        Deltas {
            delta_q_m: DMatrix::zeros(state_dim, state_dim),
            delta_g_v: DVector::zeros(reduced_dim),
            delta_g_m: DMatrix::identity(reduced_dim, reduced_dim) * self.mu,
        }
    }

    pub fn hessian_correction(&self) -> Option<HessianCorrection> {
        // §4.A: line-search-only correction; LM regularises via deltas.
        None
    }

    /// Evaluates exactly one candidate against the current `mu`. On
    /// rejection short of `max_rejections`, the caller must re-run the
    /// backward pass (mu has changed the Riccati modification) and call
    /// `try_step` again.
    pub fn try_step(&mut self, ctx: &SearchContext) -> Result<StepOutcome, NumericalError> {
        let started = std::time::Instant::now();
        let controller = ctx.synthesized.to_controller(1.0);
        let (primal, performance) = evaluate_candidate(
            ctx.problem,
            ctx.rollout,
            ctx.dual,
            ctx.mode_schedule,
            ctx.init_time,
            ctx.init_state,
            ctx.final_time,
            &controller,
            ctx.constraint_penalty,
        )?;

        let actual_reduction = ctx.nominal_merit - performance.merit;
        let predicted = ctx.predicted_cost_change.max(1e-12);
        let rho = actual_reduction / predicted;

        if rho > self.settings.rho_min {
            self.mu = (self.mu / self.settings.mu_ratio).max(1e-12);
            self.consecutive_rejections = 0;
            Ok(StepOutcome::Accepted(SearchOutcome {
                primal,
                dual: ctx.dual.clone(),
                performance,
                avg_step_time: started.elapsed(),
            }))
        } else {
            self.mu *= self.settings.mu_ratio;
            self.consecutive_rejections += 1;
            if self.consecutive_rejections >= self.settings.max_rejections {
                Ok(StepOutcome::Exhausted)
            } else {
                Ok(StepOutcome::Rejected)
            }
        }
    }
}
