//! Pointwise queries on the last converged solution (§6): `getPrimalSolution`,
//! `getValueFunction`, `getHamiltonian`, and
//! `getStateInputEqualityConstraintLagrangian`.
//!
//! Grounded on `GaussNewtonDDP::getPrimalSolution` /
//! `getValueFunctionImpl` / `getHamiltonian` /
//! `getStateInputEqualityConstraintLagrangianImpl` in
//! `original_source/ocs2_ddp/src/GaussNewtonDDP.cpp`. The value function is
//! linearly interpolated between adjacent nodes (its dimension, `nx`, is
//! constant along a trajectory); the raw model data and Riccati
//! modification used by the Hamiltonian and multiplier queries are instead
//! read off the nearest node rather than interpolated, since the number of
//! active state-input constraints `m` can differ from node to node and
//! linearly blending matrices of different shape is not meaningful.

use nalgebra::{DMatrix, DVector};

use crate::controller::feedforward_only;
use crate::interfaces::OptimalControlProblem;
use crate::model::{
    Controller, DualSolution, HamiltonianApproximation, ModelData, PrimalSolution,
    RiccatiModification, ValueFunction,
};

/// The backward-pass data needed to answer queries, captured once per
/// accepted iteration (§4.I "optimised is updated only by the final
/// search").
#[derive(Clone)]
pub struct QueryData {
    pub primal: PrimalSolution,
    pub dual: DualSolution,
    pub model_data: Vec<ModelData>,
    pub value_functions: Vec<ValueFunction>,
    pub modifications: Vec<Option<RiccatiModification>>,
}

/// Zero-order-hold lookup of the intermediate dual solution at `t`, used as
/// the multiplier argument to `approximateIntermediateLQ` inside
/// [`get_hamiltonian`] (mirrors `getIntermediateDualSolution` in the
/// original source).
fn intermediate_dual(data: &QueryData, t: f64) -> DVector<f64> {
    let node = nearest_node(t, &data.primal.times);
    data.dual
        .equality_lagrangian
        .get(node)
        .cloned()
        .unwrap_or_else(|| DVector::zeros(0))
}

/// `(index, alpha)` such that `t` lies between `times[index]` and
/// `times[index+1]`, with `alpha in [0, 1]` the fractional position;
/// clamped to the trajectory's endpoints outside its range.
fn time_segment(t: f64, times: &[f64]) -> (usize, f64) {
    if times.len() < 2 {
        return (0, 0.0);
    }
    if t <= times[0] {
        return (0, 0.0);
    }
    if t >= *times.last().unwrap() {
        return (times.len() - 2, 1.0);
    }
    let idx = times.partition_point(|&ti| ti <= t).saturating_sub(1);
    let idx = idx.min(times.len() - 2);
    let span = times[idx + 1] - times[idx];
    let alpha = if span.abs() > 1e-12 {
        (t - times[idx]) / span
    } else {
        0.0
    };
    (idx, alpha)
}

fn interpolate_vec(a: &DVector<f64>, b: &DVector<f64>, alpha: f64) -> DVector<f64> {
    a * (1.0 - alpha) + b * alpha
}

fn interpolate_mat(a: &DMatrix<f64>, b: &DMatrix<f64>, alpha: f64) -> DMatrix<f64> {
    a * (1.0 - alpha) + b * alpha
}

/// §6 `getPrimalSolution(finalTime)`: trajectory truncated to one sample
/// past `finalTime`, with the controller either the affine feedback (when
/// `useFeedbackPolicy`) or a pure feed-forward reconstructed from the input
/// trajectory.
pub fn get_primal_solution(
    optimised: &PrimalSolution,
    final_time: f64,
    use_feedback_policy: bool,
) -> PrimalSolution {
    let n = optimised.len();
    let mut length = optimised
        .times
        .partition_point(|&t| t <= final_time);
    if length != n {
        length += 1;
    }
    let length = length.min(n);

    let times = optimised.times[..length].to_vec();
    let states = optimised.states[..length].to_vec();
    let inputs = optimised.inputs[..length].to_vec();
    let post_event_indices = optimised
        .post_event_indices
        .iter()
        .copied()
        .take_while(|&idx| idx < length)
        .collect();

    let controller = if use_feedback_policy {
        match &optimised.controller {
            Some(Controller::Linear {
                nominal_states,
                bias,
                gain,
                ..
            }) => {
                // The synthesized controller's node times coincide with the
                // primal's, so it truncates to the same length.
                let clen = length.min(nominal_states.len());
                Some(Controller::Linear {
                    times: times[..clen].to_vec(),
                    nominal_states: nominal_states[..clen].to_vec(),
                    bias: bias[..clen].to_vec(),
                    gain: gain[..clen].to_vec(),
                })
            }
            other => other.clone(),
        }
    } else {
        Some(feedforward_only(&PrimalSolution {
            times: times.clone(),
            states: states.clone(),
            inputs: inputs.clone(),
            post_event_indices: vec![],
            mode_schedule: optimised.mode_schedule.clone(),
            controller: None,
        }))
    };

    PrimalSolution {
        times,
        states,
        inputs,
        post_event_indices,
        mode_schedule: optimised.mode_schedule.clone(),
        controller,
    }
}

/// §6 `getValueFunction(t, x)`: interpolate the stored quadratic value
/// function to `t` and recentre it about the query state `x` (§8 "Query
/// consistency").
pub fn get_value_function(data: &QueryData, t: f64, x: &DVector<f64>) -> ValueFunction {
    let (idx, alpha) = time_segment(t, &data.primal.times);
    let next = (idx + 1).min(data.value_functions.len() - 1);

    let s = (1.0 - alpha) * data.value_functions[idx].s + alpha * data.value_functions[next].s;
    let mut s_v = interpolate_vec(&data.value_functions[idx].s_v, &data.value_functions[next].s_v, alpha);
    let s_m = interpolate_mat(&data.value_functions[idx].s_m, &data.value_functions[next].s_m, alpha);
    let x_nominal = interpolate_vec(&data.primal.states[idx], &data.primal.states[next], alpha);

    let dx = x - &x_nominal;
    let s_m_dx = &s_m * &dx;
    let mut f = s;
    f += dx.dot(&(0.5 * &s_m_dx + &s_v));
    s_v += &s_m_dx;

    ValueFunction { s: f, s_v, s_m }
}

/// Nearest node to `t` among `times`, used for the non-interpolated raw
/// model data / Riccati modification lookups.
fn nearest_node(t: f64, times: &[f64]) -> usize {
    let (idx, alpha) = time_segment(t, times);
    if alpha >= 0.5 {
        (idx + 1).min(times.len() - 1)
    } else {
        idx
    }
}

/// §6 `getHamiltonian(t, x, u)`.
pub fn get_hamiltonian(
    data: &QueryData,
    problem: &dyn OptimalControlProblem,
    t: f64,
    x: &DVector<f64>,
    u: &DVector<f64>,
) -> HamiltonianApproximation {
    let lambda = intermediate_dual(data, t);
    let model = problem.approximate_intermediate_lq(t, x, u, &lambda);
    let value = get_value_function(data, t, x);

    let mut f = model.c;
    let mut dfdx = model.c_x.clone();
    let mut dfdu = model.c_u.clone().unwrap_or_else(|| DVector::zeros(u.len()));
    let mut dfdxx = model.c_xx.clone();
    let mut dfdux = model
        .c_ux
        .clone()
        .unwrap_or_else(|| DMatrix::zeros(u.len(), x.len()));
    let dfduu = model
        .c_uu
        .clone()
        .unwrap_or_else(|| DMatrix::zeros(u.len(), u.len()));

    if let (Some(g), Some(g_x), Some(g_u)) = (&model.g, &model.g_x, &model.g_u) {
        let nu = get_state_input_equality_constraint_lagrangian(data, t, x);
        if nu.len() == g.len() {
            f += nu.dot(g);
            dfdx += g_x.transpose() * &nu;
            dfdu += g_u.transpose() * &nu;
        }
    }

    let f_u = model.f_u.clone().unwrap_or_else(|| DMatrix::zeros(x.len(), u.len()));
    let s_m_f_x = value.s_m.transpose() * &model.f_x;
    f += value.s_v.dot(&model.f);
    dfdx += value.s_m.transpose() * &model.f + model.f_x.transpose() * &value.s_v;
    dfdu += f_u.transpose() * &value.s_v;
    dfdxx += &s_m_f_x + s_m_f_x.transpose();
    dfdux += f_u.transpose() * &value.s_m;

    HamiltonianApproximation {
        f,
        dfdx,
        dfdu,
        dfdxx,
        dfdux,
        dfduu,
    }
}

/// §6 `getStateInputEqualityConstraintLagrangian(t, x)`: the multiplier
/// `nu(x)` such that the Hamiltonian's equality-constraint term is
/// `nu^T g(x,u)`; zero-length when the nearest node carries no constraint.
pub fn get_state_input_equality_constraint_lagrangian(
    data: &QueryData,
    t: f64,
    x: &DVector<f64>,
) -> DVector<f64> {
    let node = nearest_node(t, &data.primal.times);
    let model = &data.model_data[node];
    let modification = match &data.modifications[node] {
        Some(m) if m.constraint_range_projector.ncols() > 0 => m,
        _ => return DVector::zeros(0),
    };
    let (Some(g), Some(g_x), Some(f_u), Some(c_u), Some(c_ux)) = (
        &model.g,
        &model.g_x,
        &model.f_u,
        &model.c_u,
        &model.c_ux,
    ) else {
        return DVector::zeros(0);
    };

    let dx = x - &data.primal.states[node];
    let value = get_value_function(data, t, x);
    let costate = value.s_v;

    let err = g + g_x * &dx;
    let mut temp = -c_u - c_ux * &dx - f_u.transpose() * &costate;
    temp += &modification.hamiltonian_hessian * &err;
    modification.constraint_range_projector.transpose() * &temp
}
