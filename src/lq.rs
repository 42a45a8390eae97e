//! LQ approximator (§4.C): calls the problem oracle at every node of a
//! trajectory, validates the result, and applies Hessian correction to
//! interior/event nodes when the active strategy is line-search.

use nalgebra::DVector;

use crate::error::NumericalError;
use crate::interfaces::OptimalControlProblem;
use crate::linalg::{correct_hessian, HessianCorrection};
use crate::model::{DualSolution, ModelData, PrimalSolution};
use crate::parallel::WorkerPool;

/// One fully validated and (optionally) corrected `ModelData` per node of a
/// [`PrimalSolution`], in trajectory order.
pub struct LqApproximation {
    pub nodes: Vec<ModelData>,
}

/// Approximate a single node `k` of `primal` (§4.C): interior nodes call
/// `approximate_intermediate_lq`, post-event nodes call
/// `approximate_pre_jump_lq` on the *preceding* sample, and the final node
/// calls `approximate_final_lq`. `hessian_correction` is `Some` under
/// line-search and `None` under Levenberg-Marquardt (§4.A).
pub fn approximate_node(
    problem: &dyn OptimalControlProblem,
    primal: &PrimalSolution,
    dual: &DualSolution,
    nx: usize,
    k: usize,
    hessian_correction: Option<HessianCorrection>,
) -> Result<ModelData, NumericalError> {
    let n = primal.len();
    let t = primal.times[k];
    let x = &primal.states[k];
    let is_pre_jump = k + 1 < n && primal.is_post_event(k + 1);
    let is_final = k == n - 1;

    let mut model = if is_final {
        problem.approximate_final_lq(t, x)
    } else if is_pre_jump {
        problem.approximate_pre_jump_lq(t, x)
    } else {
        let u = &primal.inputs[k];
        let lambda = dual
            .equality_lagrangian
            .get(k)
            .cloned()
            .unwrap_or_else(|| DVector::zeros(0));
        problem.approximate_intermediate_lq(t, x, u, &lambda)
    };

    let nu = if is_final || is_pre_jump {
        None
    } else {
        Some(primal.inputs[k].len())
    };
    model
        .validate(k, nx, nu)
        .map_err(|msg| NumericalError::NonFiniteState {
            node: k,
            quantity: msg,
        })?;

    if let (Some(strategy), Some(c_uu)) = (hessian_correction, model.c_uu.as_ref()) {
        model.c_uu = Some(correct_hessian(c_uu, strategy, 1e-8));
    }

    if model.g.is_some() {
        if is_final {
            return Err(NumericalError::DimensionMismatch {
                node: k,
                expected: 0,
                got: model.num_constraints(),
                quantity: "final-node equality constraint is unsupported".into(),
            });
        }
        if is_pre_jump {
            return Err(NumericalError::DimensionMismatch {
                node: k,
                expected: 0,
                got: model.num_constraints(),
                quantity: "pre-jump equality constraint is unsupported".into(),
            });
        }
        if model.g_u.is_none() {
            return Err(NumericalError::DimensionMismatch {
                node: k,
                expected: 1,
                got: 0,
                quantity: "state-only equality constraint is unsupported".into(),
            });
        }
    }

    Ok(model)
}

/// Sequential reference form of the LQ sweep; used by tests and by callers
/// (the line-search merit re-evaluation) that don't need the worker pool.
pub fn approximate(
    problem: &dyn OptimalControlProblem,
    primal: &PrimalSolution,
    dual: &DualSolution,
    hessian_correction: Option<HessianCorrection>,
) -> Result<LqApproximation, NumericalError> {
    let nx = primal.states.first().map(|x| x.len()).unwrap_or(0);
    let nodes = (0..primal.len())
        .map(|k| approximate_node(problem, primal, dual, nx, k, hessian_correction))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LqApproximation { nodes })
}

/// Index-fan-out form of the LQ sweep (§4.H): each node is approximated
/// independently, dispatched across the worker pool.
pub fn approximate_parallel(
    pool: &WorkerPool,
    problem: &dyn OptimalControlProblem,
    primal: &PrimalSolution,
    dual: &DualSolution,
    hessian_correction: Option<HessianCorrection>,
) -> Result<LqApproximation, NumericalError> {
    let nx = primal.states.first().map(|x| x.len()).unwrap_or(0);
    let results = pool.fan_out_indices(primal.len(), |k| {
        approximate_node(problem, primal, dual, nx, k, hessian_correction)
    });
    let nodes = results.into_iter().collect::<Result<Vec<_>, _>>()?;
    Ok(LqApproximation { nodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModeSchedule;
    use nalgebra::{dmatrix, dvector};

    struct ScalarLqr;
    impl OptimalControlProblem for ScalarLqr {
        fn approximate_intermediate_lq(
            &self,
            _t: f64,
            x: &DVector<f64>,
            u: &DVector<f64>,
            _lambda: &DVector<f64>,
        ) -> ModelData {
            ModelData {
                f: x + u,
                f_x: dmatrix![1.0],
                f_u: Some(dmatrix![1.0]),
                dynamics_bias: dvector![0.0],
                c: 0.5 * (x[0] * x[0] + u[0] * u[0]),
                c_x: x.clone(),
                c_u: Some(u.clone()),
                c_xx: dmatrix![1.0],
                c_ux: Some(dmatrix![0.0]),
                c_uu: Some(dmatrix![1.0]),
                g: None,
                g_x: None,
                g_u: None,
                noise_covariance: None,
            }
        }
        fn approximate_pre_jump_lq(&self, _t: f64, x: &DVector<f64>) -> ModelData {
            ModelData {
                f: x.clone(),
                f_x: dmatrix![1.0],
                f_u: None,
                dynamics_bias: dvector![0.0],
                c: 0.0,
                c_x: dvector![0.0],
                c_u: None,
                c_xx: dmatrix![0.0],
                c_ux: None,
                c_uu: None,
                g: None,
                g_x: None,
                g_u: None,
                noise_covariance: None,
            }
        }
        fn approximate_final_lq(&self, _t: f64, x: &DVector<f64>) -> ModelData {
            ModelData {
                f: x.clone(),
                f_x: dmatrix![1.0],
                f_u: None,
                dynamics_bias: dvector![0.0],
                c: 0.5 * x[0] * x[0],
                c_x: x.clone(),
                c_u: None,
                c_xx: dmatrix![1.0],
                c_ux: None,
                c_uu: None,
                g: None,
                g_x: None,
                g_u: None,
                noise_covariance: None,
            }
        }
        fn equality_lagrangian(&self, _t: f64, _x: &DVector<f64>, _u: &DVector<f64>) -> f64 {
            0.0
        }
        fn inequality_lagrangian(&self, _t: f64, _x: &DVector<f64>, _u: &DVector<f64>) -> f64 {
            0.0
        }
    }

    #[test]
    fn approximates_every_node_with_matching_dimensions() {
        let primal = PrimalSolution {
            times: vec![0.0, 1.0, 2.0],
            states: vec![dvector![1.0], dvector![0.5], dvector![0.2]],
            inputs: vec![dvector![0.1], dvector![0.05], dvector![0.0]],
            post_event_indices: vec![],
            mode_schedule: ModeSchedule::new(vec![], vec![0]),
            controller: None,
        };
        let dual = DualSolution::default();
        let result = approximate(&ScalarLqr, &primal, &dual, Some(HessianCorrection::default()))
            .unwrap();
        assert_eq!(result.nodes.len(), 3);
        assert!(result.nodes[2].c_u.is_none());
    }
}
