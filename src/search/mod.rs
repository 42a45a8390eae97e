//! Search strategies (§4.F): accept/reject a candidate backward-pass
//! solution and report convergence. Per §9's tagged-union design note, the
//! two strategies are cases of one enum rather than a trait object; the
//! enum also supplies the `(delta_Q_m, delta_G_v, delta_G_m)` deltas the
//! Riccati modification step (§4.D) consumes.

pub mod levenberg_marquardt;
pub mod line_search;

use nalgebra::DVector;

use crate::controller::SynthesizedController;
use crate::error::{IterationError, NumericalError};
use crate::interfaces::{OptimalControlProblem, RolloutBase};
use crate::linalg::HessianCorrection;
use crate::lq;
use crate::model::{Controller, DualSolution, ModeSchedule, PerformanceIndex, PrimalSolution};
use crate::modification::Deltas;

pub use levenberg_marquardt::LevenbergMarquardt;
pub use line_search::LineSearch;

/// Everything a search strategy needs to evaluate one or more candidates
/// and pick a winner.
pub struct SearchContext<'a> {
    pub problem: &'a dyn OptimalControlProblem,
    pub rollout: &'a dyn RolloutBase,
    pub pool: &'a crate::parallel::WorkerPool,
    pub synthesized: &'a SynthesizedController,
    pub dual: &'a DualSolution,
    pub init_time: f64,
    pub init_state: &'a DVector<f64>,
    pub final_time: f64,
    pub mode_schedule: &'a ModeSchedule,
    pub nominal_merit: f64,
    pub constraint_penalty: f64,
    /// Predicted cost change from the quadratic LQ model, aggregated across
    /// nodes; used by both acceptance tests.
    pub predicted_cost_change: f64,
}

pub struct SearchOutcome {
    pub primal: PrimalSolution,
    pub dual: DualSolution,
    pub performance: PerformanceIndex,
    /// Average wall time per trial, used by `SolverStatistics` (§10.D).
    pub avg_step_time: std::time::Duration,
}

/// Result of one `try_step` call.
pub enum StepOutcome {
    /// A candidate cleared the acceptance test.
    Accepted(SearchOutcome),
    /// Rejected, but the strategy still has retries left (Levenberg-
    /// Marquardt: `mu` was increased and a rejection counted; the caller
    /// re-runs the backward pass with the updated deltas and calls
    /// `try_step` again).
    Rejected,
    /// The strategy has no more retries (line-search: every trial alpha
    /// failed Armijo; Levenberg-Marquardt: `max_rejections` consecutive
    /// rejections).
    Exhausted,
}

/// Tagged union of the two search strategies (§9 design note).
pub enum SearchStrategy {
    LineSearch(LineSearch),
    LevenbergMarquardt(LevenbergMarquardt),
}

impl SearchStrategy {
    pub fn deltas(&self, node: usize, reduced_dim: usize, state_dim: usize) -> Deltas {
        match self {
            SearchStrategy::LineSearch(s) => s.deltas(node, reduced_dim, state_dim),
            SearchStrategy::LevenbergMarquardt(s) => s.deltas(node, reduced_dim, state_dim),
        }
    }

    pub fn hessian_correction(&self) -> Option<HessianCorrection> {
        match self {
            SearchStrategy::LineSearch(s) => s.hessian_correction(),
            SearchStrategy::LevenbergMarquardt(s) => s.hessian_correction(),
        }
    }

    pub fn try_step(&mut self, ctx: &SearchContext) -> Result<StepOutcome, NumericalError> {
        match self {
            SearchStrategy::LineSearch(s) => s.try_step(ctx),
            SearchStrategy::LevenbergMarquardt(s) => s.try_step(ctx),
        }
    }

    /// §4.G step 7: standard criterion is `|delta_merit| < min_rel_cost *
    /// (1 + |merit|)` and `sse < constraint_tolerance`.
    pub fn check_convergence(
        &self,
        delta_merit: f64,
        merit: f64,
        constraint_sse: f64,
        min_rel_cost: f64,
        constraint_tolerance: f64,
    ) -> Option<String> {
        if delta_merit.abs() < min_rel_cost * (1.0 + merit.abs())
            && constraint_sse < constraint_tolerance
        {
            Some(format!(
                "converged: |delta_merit|={:.3e} < tol, sse={:.3e} < {:.3e}",
                delta_merit.abs(),
                constraint_sse,
                constraint_tolerance
            ))
        } else {
            None
        }
    }

    pub fn exhausted_error(&self) -> IterationError {
        match self {
            SearchStrategy::LineSearch(_) => IterationError::LineSearchExhausted,
            SearchStrategy::LevenbergMarquardt(s) => IterationError::LevenbergMarquardtAborted {
                rejections: s.consecutive_rejections(),
                max_rejections: s.settings.max_rejections,
            },
        }
    }
}

/// Roll out `controller` from `(init_time, init_state)` and evaluate its
/// merit by re-running the LQ oracle along the resulting trajectory
/// (§4.F "compute merit `M = cost + mu sqrt(SSE) + L_eq + L_ineq`").
pub fn evaluate_candidate(
    problem: &dyn OptimalControlProblem,
    rollout: &dyn RolloutBase,
    dual: &DualSolution,
    mode_schedule: &ModeSchedule,
    init_time: f64,
    init_state: &DVector<f64>,
    final_time: f64,
    controller: &Controller,
    constraint_penalty: f64,
) -> Result<(PrimalSolution, PerformanceIndex), NumericalError> {
    let rolled = rollout.run(
        init_time,
        init_state,
        final_time,
        Some(controller),
        &mode_schedule.event_times,
    );

    let primal = PrimalSolution {
        times: rolled.times,
        states: rolled.states,
        inputs: rolled.inputs,
        post_event_indices: rolled.post_event_indices,
        mode_schedule: mode_schedule.clone(),
        controller: Some(controller.clone()),
    };

    for (k, x) in primal.states.iter().enumerate() {
        if !x.iter().all(|v| v.is_finite()) {
            return Err(NumericalError::NonFiniteState {
                node: k,
                quantity: "rolled-out state".into(),
            });
        }
    }

    let performance = performance_index(problem, &primal, dual, constraint_penalty)?;
    Ok((primal, performance))
}

/// Evaluate `{cost, equalityConstraintsSSE, equalityLagrangian,
/// inequalityLagrangian, merit}` (§3) for an already-rolled-out primal
/// solution, without performing a rollout of its own. Used both by
/// [`evaluate_candidate`] and by the outer loop to score the initial
/// trajectory before any search trial has run.
pub fn performance_index(
    problem: &dyn OptimalControlProblem,
    primal: &PrimalSolution,
    dual: &DualSolution,
    constraint_penalty: f64,
) -> Result<PerformanceIndex, NumericalError> {
    let approximation = lq::approximate(problem, primal, dual, None)?;

    let mut cost = 0.0;
    let mut sse = 0.0;
    let mut equality_lagrangian = 0.0;
    let mut inequality_lagrangian = 0.0;
    for (k, node) in approximation.nodes.iter().enumerate() {
        cost += node.c;
        if let Some(g) = &node.g {
            sse += g.norm_squared();
        }
        if k < primal.inputs.len() {
            equality_lagrangian +=
                problem.equality_lagrangian(primal.times[k], &primal.states[k], &primal.inputs[k]);
            inequality_lagrangian += problem.inequality_lagrangian(
                primal.times[k],
                &primal.states[k],
                &primal.inputs[k],
            );
        }
    }
    let merit = cost + constraint_penalty * sse.sqrt() + equality_lagrangian + inequality_lagrangian;

    Ok(PerformanceIndex {
        cost,
        equality_constraints_sse: sse,
        equality_lagrangian,
        inequality_lagrangian,
        merit,
    })
}
