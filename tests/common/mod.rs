//! Shared fixtures for the integration tests in §8: a linear-quadratic
//! `OptimalControlProblem`, a fixed-step `RolloutBase` that forward-
//! integrates the same linear dynamics (so every trajectory the solver
//! produces is dynamically consistent and the LQ approximator's dynamics
//! defect `f` is identically zero, per `model::ModelData::f`'s doc comment),
//! and trivial `Initializer`/`ReferenceManager` implementations.

use gnddp::interfaces::{Initializer, OptimalControlProblem, ReferenceManager, RolloutBase, RolloutResult};
use gnddp::model::{Controller, ModeSchedule, ModelData};
use nalgebra::{DMatrix, DVector};

/// Time-invariant linear-quadratic running + terminal cost with linear
/// dynamics `x_{k+1} = A x_k + B u_k`, no state-input equality constraint.
pub struct LinearQuadratic {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub q: DMatrix<f64>,
    pub r: DMatrix<f64>,
    pub q_final: DMatrix<f64>,
}

impl OptimalControlProblem for LinearQuadratic {
    fn approximate_intermediate_lq(
        &self,
        _t: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
        _lambda: &DVector<f64>,
    ) -> ModelData {
        let nx = x.len();
        ModelData {
            f: DVector::zeros(nx),
            f_x: self.a.clone(),
            f_u: Some(self.b.clone()),
            dynamics_bias: DVector::zeros(nx),
            c: 0.5 * (x.dot(&(&self.q * x)) + u.dot(&(&self.r * u))),
            c_x: &self.q * x,
            c_u: Some(&self.r * u),
            c_xx: self.q.clone(),
            c_ux: Some(DMatrix::zeros(u.len(), nx)),
            c_uu: Some(self.r.clone()),
            g: None,
            g_x: None,
            g_u: None,
            noise_covariance: None,
        }
    }

    fn approximate_pre_jump_lq(&self, _t: f64, x: &DVector<f64>) -> ModelData {
        let nx = x.len();
        ModelData {
            f: DVector::zeros(nx),
            f_x: DMatrix::identity(nx, nx),
            f_u: None,
            dynamics_bias: DVector::zeros(nx),
            c: 0.0,
            c_x: DVector::zeros(nx),
            c_u: None,
            c_xx: DMatrix::zeros(nx, nx),
            c_ux: None,
            c_uu: None,
            g: None,
            g_x: None,
            g_u: None,
            noise_covariance: None,
        }
    }

    fn approximate_final_lq(&self, _t: f64, x: &DVector<f64>) -> ModelData {
        let nx = x.len();
        ModelData {
            f: DVector::zeros(nx),
            f_x: DMatrix::identity(nx, nx),
            f_u: None,
            dynamics_bias: DVector::zeros(nx),
            c: 0.5 * x.dot(&(&self.q_final * x)),
            c_x: &self.q_final * x,
            c_u: None,
            c_xx: self.q_final.clone(),
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

/// [`LinearQuadratic`] with an added state-input equality constraint
/// `C x + D u = 0` at every intermediate node (§3, scenario "constraint
/// satisfaction").
pub struct ConstrainedLinearQuadratic {
    pub inner: LinearQuadratic,
    pub c: DMatrix<f64>,
    pub d: DMatrix<f64>,
}

impl OptimalControlProblem for ConstrainedLinearQuadratic {
    fn approximate_intermediate_lq(
        &self,
        t: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
        lambda: &DVector<f64>,
    ) -> ModelData {
        let mut model = self.inner.approximate_intermediate_lq(t, x, u, lambda);
        model.g = Some(&self.c * x + &self.d * u);
        model.g_x = Some(self.c.clone());
        model.g_u = Some(self.d.clone());
        model
    }

    fn approximate_pre_jump_lq(&self, t: f64, x: &DVector<f64>) -> ModelData {
        self.inner.approximate_pre_jump_lq(t, x)
    }

    fn approximate_final_lq(&self, t: f64, x: &DVector<f64>) -> ModelData {
        self.inner.approximate_final_lq(t, x)
    }

    fn equality_lagrangian(&self, t: f64, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        self.inner.equality_lagrangian(t, x, u)
    }

    fn inequality_lagrangian(&self, t: f64, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        self.inner.inequality_lagrangian(t, x, u)
    }
}

/// Fixed-step forward integrator for `x_{k+1} = A x_k + B u_k`, producing
/// `n_steps + 1` nodes evenly spaced over `[t0, t1]`. Always called with
/// `Some` controller by the solver (the no-controller branch of
/// `RolloutBase::run` is only reachable from `initial_rollout` when no
/// external controller is supplied, which these tests avoid so the first
/// nominal trajectory is itself dynamically consistent).
pub struct LinearRollout {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub n_steps: usize,
}

impl RolloutBase for LinearRollout {
    fn run(
        &self,
        t0: f64,
        x0: &DVector<f64>,
        t1: f64,
        controller: Option<&Controller>,
        _event_times: &[f64],
    ) -> RolloutResult {
        let controller = controller.expect("test rollout always driven by a controller");
        let dt = (t1 - t0) / self.n_steps as f64;
        let mut times = Vec::with_capacity(self.n_steps + 1);
        let mut states = Vec::with_capacity(self.n_steps + 1);
        let mut inputs = Vec::with_capacity(self.n_steps + 1);

        let mut x = x0.clone();
        for k in 0..=self.n_steps {
            let t = t0 + dt * k as f64;
            let u = controller.evaluate(k, &x);
            times.push(t);
            states.push(x.clone());
            inputs.push(u.clone());
            if k < self.n_steps {
                x = &self.a * &x + &self.b * &u;
            }
        }
        let x_final = states.last().unwrap().clone();

        RolloutResult {
            times,
            post_event_indices: Vec::new(),
            states,
            inputs,
            x_final,
        }
    }
}

/// Like [`LinearRollout`] but inserts one instantaneous identity-jump event
/// at a fixed step index, duplicating the sample and marking the second
/// copy as a post-event node (§3, §4.B "event steps").
pub struct SwitchedRollout {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub n_steps: usize,
    pub event_step: usize,
}

impl RolloutBase for SwitchedRollout {
    fn run(
        &self,
        t0: f64,
        x0: &DVector<f64>,
        t1: f64,
        controller: Option<&Controller>,
        _event_times: &[f64],
    ) -> RolloutResult {
        let controller = controller.expect("test rollout always driven by a controller");
        let dt = (t1 - t0) / self.n_steps as f64;
        let mut times = Vec::new();
        let mut states = Vec::new();
        let mut inputs = Vec::new();
        let mut post_event_indices = Vec::new();

        let mut x = x0.clone();
        let mut node_idx = 0usize;
        for k in 0..=self.n_steps {
            let t = t0 + dt * k as f64;
            let u = controller.evaluate(node_idx, &x);
            times.push(t);
            states.push(x.clone());
            inputs.push(u.clone());
            node_idx += 1;

            if k == self.event_step {
                // Identity jump map: the event changes the active mode, not
                // the state, but still produces a duplicate post-event node
                // per §3's post-event-index convention.
                times.push(t);
                states.push(x.clone());
                inputs.push(DVector::zeros(u.len()));
                post_event_indices.push(times.len() - 1);
                node_idx += 1;
            }
            if k < self.n_steps {
                x = &self.a * &x + &self.b * &u;
            }
        }
        let x_final = states.last().unwrap().clone();

        RolloutResult {
            times,
            post_event_indices,
            states,
            inputs,
            x_final,
        }
    }
}

/// Supplies the zero operating point everywhere; unused by these tests
/// since every `run()` call is given an explicit `external_controller`, but
/// required to construct a [`gnddp::DdpSolver`].
pub struct ZeroInitializer {
    pub nu: usize,
}

impl Initializer for ZeroInitializer {
    fn operating_point(&self, _t: f64, _mode: i64) -> (DVector<f64>, DVector<f64>) {
        (DVector::zeros(0), DVector::zeros(self.nu))
    }
}

/// A fixed [`ModeSchedule`] with no (or one) event and an all-zero target
/// trajectory.
pub struct FixedReferenceManager {
    pub mode_schedule: ModeSchedule,
    pub nx: usize,
    pub nu: usize,
}

impl ReferenceManager for FixedReferenceManager {
    fn mode_schedule(&self) -> ModeSchedule {
        self.mode_schedule.clone()
    }

    fn target_state(&self, _t: f64) -> DVector<f64> {
        DVector::zeros(self.nx)
    }

    fn target_input(&self, _t: f64) -> DVector<f64> {
        DVector::zeros(self.nu)
    }
}

/// A zero-feedforward initial controller over `n_nodes` nodes, used as the
/// `external_controller` argument to `run()` so the very first nominal
/// trajectory is produced by [`LinearRollout`]/[`SwitchedRollout`] (and is
/// therefore dynamically consistent) rather than by an unconnected
/// operating-point sampling.
pub fn zero_feedforward(n_nodes: usize, nu: usize) -> Controller {
    Controller::Feedforward {
        times: vec![0.0; n_nodes],
        bias: vec![DVector::zeros(nu); n_nodes],
    }
}
