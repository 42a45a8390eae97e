//! Switched system with one intermediate event and an identity jump map
//! (§8, "EXP0"-like scenario): checks the solver accepts the post-event node
//! bookkeeping end to end and produces a primal solution whose invariants
//! hold across the jump.

mod common;

use common::{zero_feedforward, FixedReferenceManager, LinearQuadratic, SwitchedRollout, ZeroInitializer};
use gnddp::model::ModeSchedule;
use gnddp::settings::Settings;
use gnddp::DdpSolver;
use nalgebra::{dmatrix, dvector};

#[test]
fn event_step_preserves_trajectory_invariants_and_converges() {
    let problem = LinearQuadratic {
        a: dmatrix![1.0, 0.1; 0.0, 1.0],
        b: dmatrix![0.0; 1.0],
        q: dmatrix![1.0, 0.0; 0.0, 0.1],
        r: dmatrix![0.05],
        q_final: dmatrix![10.0, 0.0; 0.0, 10.0],
    };
    let n_steps = 10;
    let event_step = 5;
    let rollout = SwitchedRollout {
        a: problem.a.clone(),
        b: problem.b.clone(),
        n_steps,
        event_step,
    };
    let event_time = 1.0;
    let mode_schedule = ModeSchedule::new(vec![event_time], vec![0, 1]);
    let reference_manager = FixedReferenceManager {
        mode_schedule,
        nx: 2,
        nu: 1,
    };

    let mut settings = Settings::default();
    settings.max_num_iterations = 10;

    let mut solver = DdpSolver::new(
        settings,
        Box::new(problem),
        Box::new(rollout),
        Box::new(ZeroInitializer { nu: 1 }),
        Box::new(reference_manager),
    )
    .unwrap();

    // n_steps + 1 samples plus one duplicated node at the event.
    let initial_controller = zero_feedforward(n_steps + 2, 1);
    let summary = solver
        .run(0.0, dvector![1.0, 0.0], 2.0, Some(initial_controller), None)
        .unwrap();

    summary.primal.check_invariants().unwrap();
    assert_eq!(summary.primal.post_event_indices.len(), 1);
    assert!(summary.performance.cost.is_finite());
}
