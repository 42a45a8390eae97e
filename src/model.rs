//! Data model (§3): trajectories, per-node linearised/quadraticised model
//! data, value functions, controllers, and performance indices.

use nalgebra::{DMatrix, DVector};

/// Piecewise-constant mode sequence: `modes.len() == event_times.len() + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSchedule {
    pub event_times: Vec<f64>,
    pub modes: Vec<i64>,
}

impl ModeSchedule {
    pub fn new(event_times: Vec<f64>, modes: Vec<i64>) -> Self {
        assert_eq!(
            modes.len(),
            event_times.len() + 1,
            "modes.len() must equal event_times.len() + 1"
        );
        Self { event_times, modes }
    }

    /// The active mode at time `t`.
    pub fn mode_at(&self, t: f64) -> i64 {
        let idx = self.event_times.partition_point(|&et| et <= t);
        self.modes[idx]
    }
}

/// Affine feedback or pure feed-forward controller, one entry per node.
#[derive(Debug, Clone)]
pub enum Controller {
    /// `u_k(x) = bias_k + gain_k (x - x_k)`.
    Linear {
        times: Vec<f64>,
        nominal_states: Vec<DVector<f64>>,
        bias: Vec<DVector<f64>>,
        gain: Vec<DMatrix<f64>>,
    },
    /// `u_k(x) = bias_k` (no feedback term).
    Feedforward {
        times: Vec<f64>,
        bias: Vec<DVector<f64>>,
    },
}

impl Controller {
    pub fn len(&self) -> usize {
        match self {
            Controller::Linear { times, .. } => times.len(),
            Controller::Feedforward { times, .. } => times.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate the controller at node `k` given the actual state `x`.
    pub fn evaluate(&self, k: usize, x: &DVector<f64>) -> DVector<f64> {
        match self {
            Controller::Linear {
                nominal_states,
                bias,
                gain,
                ..
            } => &bias[k] + &gain[k] * (x - &nominal_states[k]),
            Controller::Feedforward { bias, .. } => bias[k].clone(),
        }
    }
}

/// An ordered trajectory of `(t_k, x_k, u_k)` samples plus event bookkeeping.
///
/// Invariant: `times` is non-decreasing; every entry of `post_event_indices`
/// is strictly greater than 0 and at most `times.len() - 1`.
#[derive(Debug, Clone)]
pub struct PrimalSolution {
    pub times: Vec<f64>,
    pub states: Vec<DVector<f64>>,
    pub inputs: Vec<DVector<f64>>,
    pub post_event_indices: Vec<usize>,
    pub mode_schedule: ModeSchedule,
    pub controller: Option<Controller>,
}

impl PrimalSolution {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// §8: monotone times, strictly increasing post-event indices bounded by
    /// `N-1`, matching trajectory/controller lengths.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.times.len() != self.states.len() || self.times.len() != self.inputs.len() {
            return Err("times/states/inputs length mismatch".into());
        }
        for w in self.times.windows(2) {
            if w[1] < w[0] {
                return Err(format!("times not monotone: {} then {}", w[0], w[1]));
            }
        }
        let n = self.times.len();
        let mut prev = 0usize;
        for (i, &idx) in self.post_event_indices.iter().enumerate() {
            if idx == 0 || idx > n.saturating_sub(1) {
                return Err(format!("post-event index {idx} out of (0, N-1]"));
            }
            if i > 0 && idx <= prev {
                return Err("post_event_indices must be strictly increasing".into());
            }
            prev = idx;
        }
        if let Some(ctrl) = &self.controller {
            if ctrl.len() != n {
                return Err("controller length does not match trajectory length".into());
            }
        }
        Ok(())
    }

    pub fn is_post_event(&self, k: usize) -> bool {
        self.post_event_indices.binary_search(&k).is_ok()
    }
}

/// Dual solution: Lagrange multipliers for the state-input equality
/// constraint, one per node.
#[derive(Debug, Clone, Default)]
pub struct DualSolution {
    pub equality_lagrangian: Vec<DVector<f64>>,
}

/// Linearised dynamics, quadraticised cost, and linearised equality
/// constraint at a single node (§3).
#[derive(Debug, Clone)]
pub struct ModelData {
    /// At an interior node, the defect `phi(x_k, u_k) - x_{k+1}` between the
    /// true (integrated or jump-mapped) next state and the next node's
    /// nominal state, so that the linearised recursion reads
    /// `dx_{k+1} = f_x dx_k + f_u du_k + f`. Zero along a dynamically
    /// consistent trajectory. At an event node, the jump-map value itself
    /// (no `u` to linearise against).
    pub f: DVector<f64>,
    pub f_x: DMatrix<f64>,
    /// Absent at event nodes (no control input at a jump).
    pub f_u: Option<DMatrix<f64>>,
    /// Additive term used when propagating through modified dynamics.
    pub dynamics_bias: DVector<f64>,

    pub c: f64,
    pub c_x: DVector<f64>,
    pub c_u: Option<DVector<f64>>,
    pub c_xx: DMatrix<f64>,
    pub c_ux: Option<DMatrix<f64>>,
    pub c_uu: Option<DMatrix<f64>>,

    /// State-input equality constraint `g + g_x dx + g_u du = 0`; `None` if
    /// the node is unconstrained.
    pub g: Option<DVector<f64>>,
    pub g_x: Option<DMatrix<f64>>,
    pub g_u: Option<DMatrix<f64>>,

    /// Process-noise covariance `Sigma`, used only by the risk-sensitive
    /// (iLEG) Riccati form; `None` is equivalent to a zero matrix.
    pub noise_covariance: Option<DMatrix<f64>>,
}

impl ModelData {
    pub fn num_constraints(&self) -> usize {
        self.g.as_ref().map(|g| g.nrows()).unwrap_or(0)
    }

    /// §4.C: dimension-consistency and finiteness checks for one node's
    /// oracle output.
    pub fn validate(&self, node: usize, nx: usize, nu: Option<usize>) -> Result<(), String> {
        if self.f_x.nrows() != nx || self.f_x.ncols() != nx {
            return Err(format!("node {node}: f_x has wrong shape"));
        }
        if let (Some(nu), Some(f_u)) = (nu, &self.f_u) {
            if f_u.nrows() != nx || f_u.ncols() != nu {
                return Err(format!("node {node}: f_u has wrong shape"));
            }
        }
        if let Some(c_uu) = &self.c_uu {
            if !is_symmetric(c_uu, 1e-9) {
                return Err(format!("node {node}: c_uu is not symmetric"));
            }
        }
        for (name, v) in [("f", &self.f), ("c_x", &self.c_x)] {
            if !v.iter().all(|x| x.is_finite()) {
                return Err(format!("node {node}: non-finite entry in {name}"));
            }
        }
        if !self.c.is_finite() {
            return Err(format!("node {node}: non-finite cost"));
        }
        Ok(())
    }
}

pub fn is_symmetric(m: &DMatrix<f64>, tol: f64) -> bool {
    if m.nrows() != m.ncols() {
        return false;
    }
    for i in 0..m.nrows() {
        for j in (i + 1)..m.ncols() {
            if (m[(i, j)] - m[(j, i)]).abs() > tol {
                return false;
            }
        }
    }
    true
}

/// Symmetrise `m` by averaging with its transpose; used after every
/// Riccati-recursion update to `S_m` (§4.B: "(symmetrised)").
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Cached per-node projection and regularisation data produced by the
/// constraint projection step (§3, §4.D).
#[derive(Debug, Clone)]
pub struct RiccatiModification {
    /// `D† = (D H^-1 D^T)^-1 D H^-1`, shape `n_u x m`. Empty when `m == 0`.
    pub constraint_range_projector: DMatrix<f64>,
    /// Orthonormal basis of `ker(g_u)` under the Hamiltonian metric, shape
    /// `n_u x (n_u - m)`.
    pub constraint_null_projector: DMatrix<f64>,
    /// `H = c_uu + f_u^T S_+ f_u`, shape `n_u x n_u`.
    pub hamiltonian_hessian: DMatrix<f64>,
    /// Search-strategy-supplied regularisation, in the *projected* (reduced)
    /// control space.
    pub delta_q_m: DMatrix<f64>,
    pub delta_g_v: DVector<f64>,
    pub delta_g_m: DMatrix<f64>,
}

/// Quadratic cost-to-go `V_k(x) = s_k + Sv_k^T (x - x_k) + 1/2 (x-x_k)^T Sm_k (x-x_k)`.
#[derive(Debug, Clone)]
pub struct ValueFunction {
    pub s: f64,
    pub s_v: DVector<f64>,
    pub s_m: DMatrix<f64>,
}

impl ValueFunction {
    pub fn zeros(nx: usize) -> Self {
        Self {
            s: 0.0,
            s_v: DVector::zeros(nx),
            s_m: DMatrix::zeros(nx, nx),
        }
    }

    pub fn evaluate(&self, x_minus_xk: &DVector<f64>) -> f64 {
        self.s
            + self.s_v.dot(x_minus_xk)
            + 0.5 * (x_minus_xk.transpose() * &self.s_m * x_minus_xk)[(0, 0)]
    }
}

/// Result of the backward Riccati step at one node (§4.B): the
/// (projected) controller increment and the propagated value function.
#[derive(Debug, Clone)]
pub struct RiccatiStepResult {
    pub gain_tilde: DMatrix<f64>,
    pub bias_tilde: DVector<f64>,
    pub value_function: ValueFunction,
}

/// Quadratic approximation of the Hamiltonian `H(x, u) = c(x,u) + nu^T g(x,u)
/// + V_x(x)^T f(x,u)` about a query point (§6 `getHamiltonian`).
#[derive(Debug, Clone)]
pub struct HamiltonianApproximation {
    pub f: f64,
    pub dfdx: DVector<f64>,
    pub dfdu: DVector<f64>,
    pub dfdxx: DMatrix<f64>,
    pub dfdux: DMatrix<f64>,
    pub dfduu: DMatrix<f64>,
}

/// Scalar bundle evaluated on a rollout (§3).
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceIndex {
    pub cost: f64,
    pub equality_constraints_sse: f64,
    pub equality_lagrangian: f64,
    pub inequality_lagrangian: f64,
    pub merit: f64,
}
