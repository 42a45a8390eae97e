//! Benchmarks the discrete-time Riccati backward sweep (§4.B, §4.H) over a
//! fixed-size trajectory, at a handful of state/input dimensions.
//!
//! ```bash
//! cargo bench --bench backward_pass
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gnddp::linalg::HessianCorrection;
use gnddp::model::{ModelData, ValueFunction};
use gnddp::modification::project_node;
use gnddp::riccati::{RiccatiForm, RiccatiStep};
use gnddp::search::{LineSearch, SearchStrategy};
use gnddp::settings::LineSearchSettings;
use nalgebra::{DMatrix, DVector};

struct Dims {
    nx: usize,
    nu: usize,
}

const DIMS: &[Dims] = &[
    Dims { nx: 2, nu: 1 },
    Dims { nx: 6, nu: 3 },
    Dims { nx: 12, nu: 6 },
];

fn node(nx: usize, nu: usize) -> ModelData {
    ModelData {
        f: DVector::zeros(nx),
        f_x: DMatrix::identity(nx, nx) * 0.98,
        f_u: Some(DMatrix::from_fn(nx, nu, |i, j| if i == j { 1.0 } else { 0.0 })),
        dynamics_bias: DVector::zeros(nx),
        c: 0.0,
        c_x: DVector::zeros(nx),
        c_u: Some(DVector::zeros(nu)),
        c_xx: DMatrix::identity(nx, nx),
        c_ux: Some(DMatrix::zeros(nu, nx)),
        c_uu: Some(DMatrix::identity(nu, nu)),
        g: None,
        g_x: None,
        g_u: None,
        noise_covariance: None,
    }
}

fn bench_backward_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("backward_sweep_200_nodes");
    let strategy = SearchStrategy::LineSearch(LineSearch::new(LineSearchSettings {
        hessian_correction: Some(HessianCorrection::EigenvalueModification),
        ..LineSearchSettings::default()
    }));
    let step = RiccatiStep::new(RiccatiForm::Reduced);
    const N: usize = 200;

    for dims in DIMS {
        let model = node(dims.nx, dims.nu);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("nx{}_nu{}", dims.nx, dims.nu)),
            dims,
            |b, dims| {
                b.iter(|| {
                    let mut value = ValueFunction::zeros(dims.nx);
                    for k in (0..N).rev() {
                        let projected = project_node(k, &model, &value.s_m, &strategy).unwrap();
                        let result = step
                            .compute_interior(k, &projected.projected_model, &projected.modification, &value)
                            .unwrap();
                        value = result.value_function;
                    }
                    black_box(value.s)
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_backward_sweep);
criterion_main!(benches);
