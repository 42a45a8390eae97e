//! External collaborators (§6): the core depends on these traits and is
//! generic over implementations supplied by the caller. Everything named
//! here is out of scope for this crate's own algorithms.

use nalgebra::DVector;

use crate::model::ModeSchedule;
use crate::model::{Controller, ModelData};

/// Advances the true (possibly switched) dynamics under a controller or, in
/// the absence of one, leaves the caller to fill the gap via [`Initializer`].
pub trait RolloutBase: Send + Sync {
    /// Integrate from `(t0, x0)` to `t1`. `controller` is `None` when the
    /// rollout should stop at the first point not covered by a supplied
    /// policy. `event_times` are the switch times active over `[t0, t1]`.
    fn run(
        &self,
        t0: f64,
        x0: &DVector<f64>,
        t1: f64,
        controller: Option<&Controller>,
        event_times: &[f64],
    ) -> RolloutResult;
}

pub struct RolloutResult {
    pub times: Vec<f64>,
    pub post_event_indices: Vec<usize>,
    pub states: Vec<DVector<f64>>,
    pub inputs: Vec<DVector<f64>>,
    pub x_final: DVector<f64>,
}

/// Supplies an operating-point `(x, u)` for the portion of `[t0, t1]` a
/// rollout controller doesn't cover (§4.G "initial rollout").
pub trait Initializer: Send + Sync {
    fn operating_point(&self, t: f64, mode: i64) -> (DVector<f64>, DVector<f64>);
}

/// Owns the cost/dynamics/constraint oracles evaluated by the LQ
/// approximator (§4.C). Implementations are cloned once per worker thread so
/// oracle calls need no cross-thread locking (§5).
pub trait OptimalControlProblem: Send + Sync {
    /// Linearise/quadraticise at an interior node.
    fn approximate_intermediate_lq(
        &self,
        t: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
        lambda: &DVector<f64>,
    ) -> ModelData;

    /// Linearise/quadraticise the jump cost and jump map just before an
    /// event; there is no control input at this node.
    fn approximate_pre_jump_lq(&self, t: f64, x: &DVector<f64>) -> ModelData;

    /// Linearise/quadraticise the terminal (heuristic) cost.
    fn approximate_final_lq(&self, t: f64, x: &DVector<f64>) -> ModelData;

    /// Equality-constraint Lagrangian term at a node, used by the merit and
    /// by dual-solution updates.
    fn equality_lagrangian(&self, t: f64, x: &DVector<f64>, u: &DVector<f64>) -> f64;

    /// Inequality-constraint Lagrangian term (soft constraints only; §1
    /// treats hard state-only equality constraints as out of scope).
    fn inequality_lagrangian(&self, t: f64, x: &DVector<f64>, u: &DVector<f64>) -> f64;
}

/// Supplies the active [`ModeSchedule`] and target trajectory for the
/// current solve. Mutation across solves is the caller's responsibility
/// (protected by a lock there, per §6); this trait only reads.
pub trait ReferenceManager: Send + Sync {
    fn mode_schedule(&self) -> ModeSchedule;
    fn target_state(&self, t: f64) -> DVector<f64>;
    fn target_input(&self, t: f64) -> DVector<f64>;
}
