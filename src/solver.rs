//! DDP outer loop (§4.G): iteration control tying together the LQ
//! approximator, the backward Riccati sweep, controller synthesis, and the
//! search strategy.

use std::time::Duration;

use nalgebra::DVector;
use tracing::{debug, info, info_span};

use crate::containers::{Containers, Iterate};
use crate::controller;
use crate::error::{ConfigError, DdpError, DdpResult, IterationError};
use crate::interfaces::{Initializer, OptimalControlProblem, ReferenceManager, RolloutBase};
use crate::model::{
    Controller, DualSolution, HamiltonianApproximation, ModeSchedule, PerformanceIndex,
    PrimalSolution, RiccatiModification, RiccatiStepResult, ValueFunction,
};
use crate::modification::project_node;
use crate::parallel::{SingleThreadedBlasGuard, WorkerPool};
use crate::query::{self, QueryData};
use crate::riccati::{RiccatiForm, RiccatiStep};
use crate::search::{self, SearchContext, SearchStrategy, StepOutcome};
use crate::settings::{Algorithm, Settings, Strategy};

/// Per-phase wall-time counters and iteration bookkeeping (§10.D, §11).
#[derive(Debug, Clone, Default)]
pub struct SolverStatistics {
    pub iterations: usize,
    pub lq_approximation_time: Duration,
    pub backward_pass_time: Duration,
    pub controller_synthesis_time: Duration,
    pub search_time: Duration,
}

#[derive(Debug, Clone)]
pub enum TerminationReason {
    Converged(String),
    MaxIterations,
    StalledSearch(String),
}

pub struct SolutionSummary {
    pub primal: PrimalSolution,
    pub dual: DualSolution,
    pub performance: PerformanceIndex,
    pub statistics: SolverStatistics,
    pub termination: TerminationReason,
}

/// Per-node backward-pass scratch kept around for controller synthesis
/// after the sweep completes.
struct BackwardPassOutput {
    results: Vec<Option<RiccatiStepResult>>,
    modifications: Vec<Option<RiccatiModification>>,
    p_x: Vec<nalgebra::DMatrix<f64>>,
    u_0: Vec<DVector<f64>>,
    value_functions: Vec<ValueFunction>,
}

pub struct DdpSolver {
    settings: Settings,
    problem: Box<dyn OptimalControlProblem>,
    rollout: Box<dyn RolloutBase>,
    initializer: Box<dyn Initializer>,
    reference_manager: Box<dyn ReferenceManager>,
    pool: WorkerPool,
    strategy: SearchStrategy,
    riccati: RiccatiStep,
    statistics: SolverStatistics,
    previous_value_functions: Option<Vec<ValueFunction>>,
    /// Backward-pass data from the most recent LQ/Riccati sweep, used to
    /// answer the pointwise queries in §6. Captured against the nominal
    /// trajectory the sweep ran on, which may lag the final accepted
    /// iterate by the last search step.
    query_data: Option<QueryData>,
    /// The final accepted (`optimised`) primal/dual of the last `run`,
    /// used by `get_primal_solution`.
    optimised: Option<(PrimalSolution, DualSolution)>,
    /// Advisory `partitioning_hint` passed to the last `run` (§9, §11);
    /// actual partitions are always derived from the post-rollout time
    /// trajectory, balanced by node count, so this is only retained for
    /// callers that want to read back what they asked for.
    partitioning_hint: Option<Vec<f64>>,
    /// One [`PerformanceIndex`] per accepted iteration of the last `run`,
    /// in order, for callers that want to verify the merit/SSE trend
    /// (§8 scenario 3).
    performance_history: Vec<PerformanceIndex>,
}

impl DdpSolver {
    pub fn new(
        settings: Settings,
        problem: Box<dyn OptimalControlProblem>,
        rollout: Box<dyn RolloutBase>,
        initializer: Box<dyn Initializer>,
        reference_manager: Box<dyn ReferenceManager>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let pool = WorkerPool::new(settings.n_threads)
            .map_err(|_| ConfigError::NonPositiveThreadCount(settings.n_threads))?;
        let strategy = match settings.strategy {
            Strategy::LineSearch => {
                SearchStrategy::LineSearch(crate::search::LineSearch::new(settings.line_search))
            }
            Strategy::LevenbergMarquardt => SearchStrategy::LevenbergMarquardt(
                crate::search::LevenbergMarquardt::new(settings.levenberg_marquardt),
            ),
        };
        let riccati_form = match settings.algorithm {
            Algorithm::Ilqr => RiccatiForm::Reduced,
            Algorithm::Slq => RiccatiForm::RiskSensitive {
                risk_sensitive_coefficient: settings.risk_sensitive_coefficient,
            },
        };
        Ok(Self {
            settings,
            problem,
            rollout,
            initializer,
            reference_manager,
            pool,
            strategy,
            riccati: RiccatiStep::new(riccati_form),
            statistics: SolverStatistics::default(),
            previous_value_functions: None,
            query_data: None,
            optimised: None,
            partitioning_hint: None,
            performance_history: Vec::new(),
        })
    }

    pub fn statistics(&self) -> &SolverStatistics {
        &self.statistics
    }

    /// The advisory `partitioning_hint` passed to the last `run`, if any.
    pub fn partitioning_hint(&self) -> Option<&[f64]> {
        self.partitioning_hint.as_deref()
    }

    /// One [`PerformanceIndex`] per accepted iteration of the last `run`.
    pub fn performance_history(&self) -> &[PerformanceIndex] {
        &self.performance_history
    }

    /// §6 `getPrimalSolution(finalTime)`.
    pub fn get_primal_solution(&self, final_time: f64) -> Option<PrimalSolution> {
        let (optimised, _) = self.optimised.as_ref()?;
        Some(query::get_primal_solution(
            optimised,
            final_time,
            self.settings.use_feedback_policy,
        ))
    }

    /// §6 `getValueFunction(t, x)`.
    pub fn get_value_function(&self, t: f64, x: &DVector<f64>) -> Option<ValueFunction> {
        let data = self.query_data.as_ref()?;
        Some(query::get_value_function(data, t, x))
    }

    /// §6 `getHamiltonian(t, x, u)`.
    pub fn get_hamiltonian(
        &self,
        t: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Option<HamiltonianApproximation> {
        let data = self.query_data.as_ref()?;
        Some(query::get_hamiltonian(data, self.problem.as_ref(), t, x, u))
    }

    /// §6 `getStateInputEqualityConstraintLagrangian(t, x)`.
    pub fn get_state_input_equality_constraint_lagrangian(
        &self,
        t: f64,
        x: &DVector<f64>,
    ) -> Option<DVector<f64>> {
        let data = self.query_data.as_ref()?;
        Some(query::get_state_input_equality_constraint_lagrangian(data, t, x))
    }

    /// §4.G top-level solve. `partitioning_hint` mirrors the source's
    /// `partitioningTimes` argument (§9, §11): it is advisory only, and is
    /// not used to derive the actual backward-pass partitions, which always
    /// come from `balanced_partitions` over the post-rollout trajectory.
    pub fn run(
        &mut self,
        init_time: f64,
        init_state: DVector<f64>,
        final_time: f64,
        external_controller: Option<Controller>,
        partitioning_hint: Option<Vec<f64>>,
    ) -> DdpResult<SolutionSummary> {
        self.statistics = SolverStatistics::default();
        self.previous_value_functions = None;
        self.query_data = None;
        self.partitioning_hint = partitioning_hint;
        self.performance_history.clear();

        // §5, §9: pin dense-linear-algebra threading to 1 for the duration
        // of the loop, restored on return (including early/error returns)
        // by the guard's drop.
        let _blas_guard = SingleThreadedBlasGuard::acquire();

        let mode_schedule = self.reference_manager.mode_schedule();
        let initial_primal = self.initial_rollout(
            init_time,
            &init_state,
            final_time,
            external_controller.as_ref(),
            &mode_schedule,
        );
        initial_primal
            .check_invariants()
            .map_err(|msg| DdpError::Numerical(crate::error::NumericalError::NonFiniteState {
                node: 0,
                quantity: msg,
            }))?;

        let n = initial_primal.len();
        let initial_dual = DualSolution {
            equality_lagrangian: vec![DVector::zeros(0); n],
        };
        let initial_performance = search::performance_index(
            self.problem.as_ref(),
            &initial_primal,
            &initial_dual,
            self.settings.constraint_penalty_initial_value,
        )?;

        let mut containers = Containers::new(Iterate {
            primal: initial_primal,
            dual: initial_dual,
            performance: initial_performance,
        });

        let mut mu_penalty = self.settings.constraint_penalty_initial_value;
        let mut tau_penalty = self.settings.constraint_tolerance;

        let mut termination = TerminationReason::MaxIterations;
        let mut previous_merit = containers.nominal.performance.merit;

        for iteration in 0..self.settings.max_num_iterations {
            self.statistics.iterations = iteration + 1;
            let span = info_span!("ddp.iteration", iteration, merit = previous_merit);
            let _enter = span.enter();

            let update_result = self.run_search_with_backward_passes(
                &mut containers,
                &mode_schedule,
                init_time,
                &init_state,
                final_time,
                mu_penalty,
                iteration,
            );

            match update_result {
                Ok(outcome) => {
                    let delta_merit = outcome.performance.merit - previous_merit;
                    containers.accept(Iterate {
                        primal: outcome.primal,
                        dual: outcome.dual,
                        performance: outcome.performance,
                    });

                    if self.settings.update_duals_before_lq {
                        self.update_duals(&mut containers, mu_penalty);
                    }

                    if containers.nominal.performance.equality_constraints_sse < tau_penalty {
                        tau_penalty /= mu_penalty.powf(0.9);
                    } else {
                        mu_penalty *= self.settings.constraint_penalty_increase_rate;
                        tau_penalty /= mu_penalty.powf(0.1);
                    }
                    tau_penalty = tau_penalty.max(self.settings.constraint_tolerance);

                    if !self.settings.update_duals_before_lq {
                        self.update_duals(&mut containers, mu_penalty);
                    }

                    if self.settings.display_info || self.settings.display_short_summary {
                        info!(
                            iteration,
                            cost = containers.nominal.performance.cost,
                            merit = containers.nominal.performance.merit,
                            sse = containers.nominal.performance.equality_constraints_sse,
                            "ddp iteration summary"
                        );
                    }

                    if let Some(reason) = self.strategy.check_convergence(
                        delta_merit,
                        containers.nominal.performance.merit,
                        containers.nominal.performance.equality_constraints_sse,
                        self.settings.min_rel_cost,
                        self.settings.constraint_tolerance,
                    ) {
                        termination = TerminationReason::Converged(reason);
                        previous_merit = containers.nominal.performance.merit;
                        break;
                    }
                    previous_merit = containers.nominal.performance.merit;
                }
                Err(IterationError::LineSearchExhausted) => {
                    containers.revert();
                    termination =
                        TerminationReason::StalledSearch(IterationError::LineSearchExhausted.to_string());
                    break;
                }
                Err(e @ IterationError::LevenbergMarquardtAborted { .. }) => {
                    containers.revert();
                    termination = TerminationReason::StalledSearch(e.to_string());
                    break;
                }
            }
        }

        containers.commit_optimised();
        self.performance_history = containers.history().to_vec();
        self.optimised = Some((
            containers.optimised.primal.clone(),
            containers.optimised.dual.clone(),
        ));

        Ok(SolutionSummary {
            primal: containers.optimised.primal,
            dual: containers.optimised.dual,
            performance: containers.optimised.performance,
            statistics: self.statistics.clone(),
            termination,
        })
    }

    /// One full LQ -> backward-pass -> controller-synthesis -> search
    /// cycle, re-run as many times as the search strategy rejects and
    /// retries (Levenberg-Marquardt only; line search always returns after
    /// one call, §4.F).
    fn run_search_with_backward_passes(
        &mut self,
        containers: &mut Containers,
        mode_schedule: &ModeSchedule,
        init_time: f64,
        init_state: &DVector<f64>,
        final_time: f64,
        mu_penalty: f64,
        iteration: usize,
    ) -> Result<search::SearchOutcome, IterationError> {
        loop {
            let t0 = std::time::Instant::now();
            let hessian_correction = self.strategy.hessian_correction();
            let approximation = match crate::lq::approximate_parallel(
                &self.pool,
                self.problem.as_ref(),
                &containers.nominal.primal,
                &containers.nominal.dual,
                hessian_correction,
            ) {
                Ok(a) => a,
                Err(_) => return Err(self.strategy.exhausted_error()),
            };
            self.statistics.lq_approximation_time += t0.elapsed();

            let t1 = std::time::Instant::now();
            let backward = match self.backward_pass(&approximation.nodes, iteration) {
                Ok(b) => b,
                Err(_) => return Err(self.strategy.exhausted_error()),
            };
            self.statistics.backward_pass_time += t1.elapsed();
            self.previous_value_functions = Some(backward.value_functions.clone());
            self.query_data = Some(QueryData {
                primal: containers.nominal.primal.clone(),
                dual: containers.nominal.dual.clone(),
                model_data: approximation.nodes.clone(),
                value_functions: backward.value_functions.clone(),
                modifications: backward.modifications.clone(),
            });

            let t2 = std::time::Instant::now();
            let synthesized = controller::synthesize(
                &containers.nominal.primal,
                &backward.modifications,
                &backward.results,
                &backward.p_x,
                &backward.u_0,
            );
            self.statistics.controller_synthesis_time += t2.elapsed();

            let predicted_cost_change = backward
                .results
                .iter()
                .flatten()
                .map(|r| 0.5 * r.bias_tilde.dot(&r.bias_tilde))
                .sum::<f64>()
                .max(1e-12);

            let ctx = SearchContext {
                problem: self.problem.as_ref(),
                rollout: self.rollout.as_ref(),
                pool: &self.pool,
                synthesized: &synthesized,
                dual: &containers.nominal.dual,
                init_time,
                init_state,
                final_time,
                mode_schedule,
                nominal_merit: containers.nominal.performance.merit,
                constraint_penalty: mu_penalty,
                predicted_cost_change,
            };

            let t3 = std::time::Instant::now();
            let outcome = self.strategy.try_step(&ctx);
            self.statistics.search_time += t3.elapsed();

            match outcome {
                Ok(StepOutcome::Accepted(outcome)) => return Ok(outcome),
                Ok(StepOutcome::Rejected) => continue,
                Ok(StepOutcome::Exhausted) | Err(_) => {
                    return Err(self.strategy.exhausted_error());
                }
            }
        }
    }

    /// §4.B/§4.D backward sweep, producing a value function and projected
    /// controller increment at every node. Sequential on the first
    /// iteration (no previous value function to seed partition boundaries);
    /// partitioned-parallel afterwards (§5, §9).
    fn backward_pass(
        &self,
        nodes: &[crate::model::ModelData],
        iteration: usize,
    ) -> Result<BackwardPassOutput, crate::error::NumericalError> {
        let n = nodes.len();
        let nx = nodes.first().map(|m| m.f_x.nrows()).unwrap_or(0);

        let mut results: Vec<Option<RiccatiStepResult>> = (0..n).map(|_| None).collect();
        let mut modifications: Vec<Option<RiccatiModification>> = (0..n).map(|_| None).collect();
        let mut p_x = vec![nalgebra::DMatrix::zeros(0, 0); n];
        let mut u_0 = vec![DVector::zeros(0); n];
        let mut value_functions: Vec<ValueFunction> = (0..n).map(|_| ValueFunction::zeros(nx)).collect();

        let can_partition = iteration > 0 && self.pool.num_threads() > 1 && self.previous_value_functions.is_some();

        if can_partition {
            let previous = self.previous_value_functions.as_ref().unwrap();
            // Each partition runs sequentially-within (the Riccati sweep is
            // inherently sequential in decreasing time), concurrently-across
            // partitions, seeded from the previous iteration's value
            // function at the partition boundary (§4.H, §9).
            let outputs = self.pool.fan_out_partitions(n, |range| {
                let seed = previous
                    .get(range.end)
                    .cloned()
                    .unwrap_or_else(|| ValueFunction::zeros(nx));
                self.backward_sweep_range(nodes, range.clone(), seed)
            });
            for (range, result) in outputs {
                let (mut r, m, px, u0, vf) = result?;
                for (offset, k) in range.clone().enumerate() {
                    results[k] = r[offset].take();
                    modifications[k] = m[offset].clone();
                    p_x[k] = px[offset].clone();
                    u_0[k] = u0[offset].clone();
                    value_functions[k] = vf[offset].clone();
                }
            }
        } else {
            let (r, m, px, u0, vf) = self.backward_sweep_range(nodes, 0..n, ValueFunction::zeros(nx))?;
            results = r;
            modifications = m;
            p_x = px;
            u_0 = u0;
            value_functions = vf;
        }

        debug!(nodes = n, "backward pass complete");
        Ok(BackwardPassOutput {
            results,
            modifications,
            p_x,
            u_0,
            value_functions,
        })
    }

    #[allow(clippy::type_complexity)]
    fn backward_sweep_range(
        &self,
        nodes: &[crate::model::ModelData],
        range: std::ops::Range<usize>,
        boundary_value: ValueFunction,
    ) -> Result<
        (
            Vec<Option<RiccatiStepResult>>,
            Vec<Option<RiccatiModification>>,
            Vec<nalgebra::DMatrix<f64>>,
            Vec<DVector<f64>>,
            Vec<ValueFunction>,
        ),
        crate::error::NumericalError,
    > {
        let len = range.len();
        let mut results = vec![None; len];
        let mut modifications = vec![None; len];
        let mut p_x = vec![nalgebra::DMatrix::zeros(0, 0); len];
        let mut u_0 = vec![DVector::zeros(0); len];
        let mut value_functions = vec![ValueFunction::zeros(0); len];

        let mut value_next = boundary_value;
        for (offset, k) in range.clone().enumerate().rev() {
            let model = &nodes[k];
            if model.f_u.is_none() {
                let value = self.riccati.compute_event(k, model, &value_next)?;
                value_functions[offset] = value.clone();
                value_next = value;
            } else {
                let projected = project_node(k, model, &value_next.s_m, &self.strategy)?;
                let step = self
                    .riccati
                    .compute_interior(k, &projected.projected_model, &projected.modification, &value_next)?;
                value_functions[offset] = step.value_function.clone();
                value_next = step.value_function.clone();
                p_x[offset] = projected.p_x;
                u_0[offset] = projected.u_0;
                modifications[offset] = Some(projected.modification);
                results[offset] = Some(step);
            }
        }

        Ok((results, modifications, p_x, u_0, value_functions))
    }

    /// §4.G "initial rollout": run the caller-supplied controller where
    /// defined, fall back to the `Initializer` for any prefix/suffix it
    /// doesn't cover. Duplicate seam samples are collapsed (§11).
    fn initial_rollout(
        &self,
        init_time: f64,
        init_state: &DVector<f64>,
        final_time: f64,
        external_controller: Option<&Controller>,
        mode_schedule: &ModeSchedule,
    ) -> PrimalSolution {
        if let Some(controller) = external_controller {
            let rolled = self.rollout.run(
                init_time,
                init_state,
                final_time,
                Some(controller),
                &mode_schedule.event_times,
            );
            return PrimalSolution {
                times: rolled.times,
                states: rolled.states,
                inputs: rolled.inputs,
                post_event_indices: rolled.post_event_indices,
                mode_schedule: mode_schedule.clone(),
                controller: Some(controller.clone()),
            };
        }

        // No controller: sample the operating-point initializer at the
        // mode-schedule's event times (plus the endpoints), one node per
        // mode segment boundary.
        let mut times = vec![init_time];
        times.extend(
            mode_schedule
                .event_times
                .iter()
                .copied()
                .filter(|&t| t > init_time && t < final_time),
        );
        times.push(final_time);
        times.dedup_by(|a, b| (*a - *b).abs() < 1e-12);

        let mut states = Vec::with_capacity(times.len());
        let mut inputs = Vec::with_capacity(times.len());
        let mut post_event_indices = Vec::new();
        for (idx, &t) in times.iter().enumerate() {
            let mode = mode_schedule.mode_at(t);
            let (x, u) = self.initializer.operating_point(t, mode);
            states.push(x);
            inputs.push(u);
            if idx > 0 && mode_schedule.event_times.contains(&t) {
                post_event_indices.push(idx);
            }
        }
        states[0] = init_state.clone();

        PrimalSolution {
            times,
            states,
            inputs,
            post_event_indices,
            mode_schedule: mode_schedule.clone(),
            controller: None,
        }
    }

    /// §4.G step 2: Uzawa-style dual ascent `lambda_k <- lambda_k +
    /// mu_penalty * g_k`, re-linearising along the (possibly just-accepted)
    /// nominal trajectory to read off each node's constraint residual.
    fn update_duals(&self, containers: &mut Containers, mu_penalty: f64) {
        let approximation = match crate::lq::approximate(
            self.problem.as_ref(),
            &containers.nominal.primal,
            &containers.nominal.dual,
            None,
        ) {
            Ok(a) => a,
            Err(_) => return,
        };

        let mut updated = containers.nominal.dual.equality_lagrangian.clone();
        for (k, node) in approximation.nodes.iter().enumerate() {
            if let Some(g) = &node.g {
                let current = updated
                    .get(k)
                    .cloned()
                    .unwrap_or_else(|| DVector::zeros(g.len()));
                let current = if current.len() == g.len() {
                    current
                } else {
                    DVector::zeros(g.len())
                };
                updated[k] = current + g * mu_penalty;
            }
        }
        containers.nominal.dual = DualSolution {
            equality_lagrangian: updated,
        };
    }
}
