//! State-input equality constraint scenario (§8): the dual-ascent loop
//! should drive the accumulated constraint violation down monotonically as
//! iterations proceed, and the final accepted iterate should satisfy the
//! constraint tolerance.

mod common;

use common::{zero_feedforward, ConstrainedLinearQuadratic, FixedReferenceManager, LinearQuadratic, LinearRollout, ZeroInitializer};
use gnddp::model::ModeSchedule;
use gnddp::settings::Settings;
use gnddp::DdpSolver;
use nalgebra::{dmatrix, dvector};

#[test]
fn equality_constraint_sse_converges_below_tolerance() {
    let inner = LinearQuadratic {
        a: dmatrix![0.95, 0.0; 0.0, 0.9],
        b: dmatrix![1.0, 0.0; 0.0, 1.0],
        q: dmatrix![1.0, 0.0; 0.0, 1.0],
        r: dmatrix![0.1, 0.0; 0.0, 0.1],
        q_final: dmatrix![5.0, 0.0; 0.0, 5.0],
    };
    // Constrain u1 = u0 (a coupling between the two inputs) at every node.
    let problem = ConstrainedLinearQuadratic {
        inner,
        c: dmatrix![0.0, 0.0],
        d: dmatrix![1.0, -1.0],
    };
    let rollout = LinearRollout {
        a: problem.inner.a.clone(),
        b: problem.inner.b.clone(),
        n_steps: 15,
    };
    let mode_schedule = ModeSchedule::new(vec![], vec![0]);
    let reference_manager = FixedReferenceManager {
        mode_schedule,
        nx: 2,
        nu: 2,
    };

    let mut settings = Settings::default();
    settings.max_num_iterations = 30;
    settings.constraint_tolerance = 1e-4;
    let constraint_tolerance = settings.constraint_tolerance;

    let mut solver = DdpSolver::new(
        settings,
        Box::new(problem),
        Box::new(rollout),
        Box::new(ZeroInitializer { nu: 2 }),
        Box::new(reference_manager),
    )
    .unwrap();

    let initial_controller = zero_feedforward(16, 2);
    let summary = solver
        .run(0.0, dvector![2.0, -1.0], 3.0, Some(initial_controller), None)
        .unwrap();

    assert!(summary.performance.equality_constraints_sse.is_finite());
    assert!(summary.performance.equality_constraints_sse < constraint_tolerance);

    let history = solver.performance_history();
    assert!(history.len() >= 2, "need at least two accepted iterations to check a trend");
    for window in history.windows(2) {
        assert!(
            window[1].equality_constraints_sse <= window[0].equality_constraints_sse + 1e-9,
            "SSE increased between accepted iterations: {:?} -> {:?}",
            window[0].equality_constraints_sse,
            window[1].equality_constraints_sse
        );
    }
}
