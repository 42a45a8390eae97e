//! Error types for the DDP core.
//!
//! Three families, matching the propagation rules in the specification:
//! configuration errors and unrecovered numerical errors are fatal and
//! escape [`crate::solver::DdpSolver::run`]; iteration errors are absorbed
//! by the search strategy and folded into a [`crate::solver::TerminationReason`].

use thiserror::Error;

/// Top-level error returned by the solver's public entry points.
#[derive(Error, Debug)]
pub enum DdpError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error(transparent)]
    Numerical(#[from] NumericalError),
    #[error(transparent)]
    Iteration(#[from] IterationError),
}

/// Fatal: raised before the first iteration or while applying settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("state-only equality constraints are not supported by DDP; use a Lagrangian handler")]
    StateOnlyEqualityConstraint,
    #[error("pre-jump equality constraints are not supported")]
    PreJumpEqualityConstraint,
    #[error("final-node equality constraints are not supported")]
    FinalEqualityConstraint,
    #[error("thread count must be positive, got {0}")]
    NonPositiveThreadCount(usize),
    #[error("invalid penalty parameters: mu_penalty={mu_penalty}, tau_penalty={tau_penalty}")]
    InvalidPenaltyParameters { mu_penalty: f64, tau_penalty: f64 },
    #[error("settings file could not be parsed: {0}")]
    SettingsParse(String),
}

/// Fatal unless caught inside a search trial (line-search / Levenberg-Marquardt).
#[derive(Error, Debug)]
pub enum NumericalError {
    #[error("non-finite entry in rolled-out state at node {node}: {quantity}")]
    NonFiniteState { node: usize, quantity: String },
    #[error("value function S_m at node {node} is not PSD within tolerance {tolerance:e} (min eigenvalue {min_eigenvalue:e})")]
    ValueFunctionNotPsd {
        node: usize,
        tolerance: f64,
        min_eigenvalue: f64,
    },
    #[error("Hamiltonian Hessian at node {node} is not PD after correction (min eigenvalue {min_eigenvalue:e})")]
    HamiltonianHessianNotPd { node: usize, min_eigenvalue: f64 },
    #[error("risk-sensitive matrix (I - theta * S_plus * Sigma) is singular at node {node}")]
    RiskSensitiveMatrixSingular { node: usize },
    #[error("oracle output dimension mismatch at node {node}: expected {expected}, got {got} ({quantity})")]
    DimensionMismatch {
        node: usize,
        expected: usize,
        got: usize,
        quantity: String,
    },
    #[error("constraint Jacobian at node {node} does not have full row rank")]
    ConstraintNotFullRowRank { node: usize },
}

/// Recoverable: the search strategy could not find an acceptable step.
#[derive(Error, Debug)]
pub enum IterationError {
    #[error("line search exhausted trial step sizes down to alpha_min without an accepted step")]
    LineSearchExhausted,
    #[error("Levenberg-Marquardt aborted after {rejections} consecutive rejections (max {max_rejections})")]
    LevenbergMarquardtAborted {
        rejections: usize,
        max_rejections: usize,
    },
}

pub type DdpResult<T> = Result<T, DdpError>;
