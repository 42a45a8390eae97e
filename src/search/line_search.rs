//! Armijo line-search strategy (§4.F).

use crate::error::NumericalError;
use crate::linalg::HessianCorrection;
use crate::modification::Deltas;
use crate::settings::LineSearchSettings;

use super::{evaluate_candidate, SearchContext, SearchOutcome, StepOutcome};

pub struct LineSearch {
    pub settings: LineSearchSettings,
}

impl LineSearch {
    pub fn new(settings: LineSearchSettings) -> Self {
        Self { settings }
    }

    fn trial_alphas(&self) -> Vec<f64> {
        let mut alphas = Vec::new();
        let mut alpha = self.settings.alpha_max;
        while alpha >= self.settings.alpha_min {
            alphas.push(alpha);
            alpha *= self.settings.contraction_rate;
        }
        alphas
    }

    pub fn deltas(&self, _node: usize, reduced_dim: usize, state_dim: usize) -> Deltas {
        Deltas::zero(reduced_dim, state_dim)
    }

    pub fn hessian_correction(&self) -> Option<HessianCorrection> {
        self.settings.hessian_correction
    }

    /// Evaluates the whole trial ladder in parallel and returns the
    /// largest-alpha acceptance, or `Exhausted` if none clears the Armijo
    /// test (§4.F).
    pub fn try_step(&mut self, ctx: &SearchContext) -> Result<StepOutcome, NumericalError> {
        let alphas = self.trial_alphas();
        let started = std::time::Instant::now();

        let trials: Vec<Result<_, NumericalError>> = ctx.pool.fan_out_candidates(&alphas, |_, &alpha| {
            let controller = ctx.synthesized.to_controller(alpha);
            evaluate_candidate(
                ctx.problem,
                ctx.rollout,
                ctx.dual,
                ctx.mode_schedule,
                ctx.init_time,
                ctx.init_state,
                ctx.final_time,
                &controller,
                ctx.constraint_penalty,
            )
        });

        let avg_step_time = started.elapsed() / (alphas.len().max(1) as u32);

        // alphas is sorted descending; the first (largest-alpha) trial that
        // clears the Armijo test wins (§4.F "largest alpha... ties broken
        // by lowest id", which the descending order already encodes).
        for (alpha, trial) in alphas.iter().zip(trials) {
            let (primal, performance) = match trial {
                Ok(v) => v,
                Err(_) => continue,
            };
            let armijo_rhs = ctx.nominal_merit
                - self.settings.armijo_coefficient * alpha * ctx.predicted_cost_change.abs();
            if performance.merit <= armijo_rhs {
                return Ok(StepOutcome::Accepted(SearchOutcome {
                    primal,
                    dual: ctx.dual.clone(),
                    performance,
                    avg_step_time,
                }));
            }
        }
        Ok(StepOutcome::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_alphas_are_descending_and_bounded() {
        let ls = LineSearch::new(LineSearchSettings {
            alpha_min: 0.01,
            alpha_max: 1.0,
            contraction_rate: 0.5,
            armijo_coefficient: 1e-4,
            hessian_correction: Some(HessianCorrection::default()),
        });
        let alphas = ls.trial_alphas();
        assert_eq!(alphas.first().copied(), Some(1.0));
        assert!(alphas.windows(2).all(|w| w[0] > w[1]));
        assert!(alphas.iter().all(|&a| a >= 0.01));
    }
}
