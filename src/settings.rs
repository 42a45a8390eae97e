//! Configuration (§6, §10.C): the solver's tunable parameters, loadable
//! from TOML via `serde`, mirroring diffsol's pattern of a plain
//! `Deserialize` struct with a hand-written `Default`.

use serde::Deserialize;

use crate::error::ConfigError;
use crate::linalg::HessianCorrection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Ilqr,
    Slq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    LineSearch,
    LevenbergMarquardt,
}

/// §4.F line-search sub-settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct LineSearchSettings {
    pub alpha_min: f64,
    pub alpha_max: f64,
    pub contraction_rate: f64,
    pub armijo_coefficient: f64,
    /// Hessian-correction strategy applied to `c_uu` at every interior/
    /// event node (§4.A, §4.C); `None` disables correction entirely, so an
    /// indefinite `c_uu` surfaces as `NumericalError::HamiltonianHessianNotPd`
    /// from the backward pass instead of being patched up.
    pub hessian_correction: Option<HessianCorrection>,
}

impl Default for LineSearchSettings {
    fn default() -> Self {
        Self {
            alpha_min: 1e-4,
            alpha_max: 1.0,
            contraction_rate: 0.5,
            armijo_coefficient: 1e-4,
            hessian_correction: Some(HessianCorrection::default()),
        }
    }
}

/// §4.F Levenberg-Marquardt sub-settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct LevenbergMarquardtSettings {
    pub rho_min: f64,
    pub mu_factor: f64,
    pub mu_ratio: f64,
    pub max_rejections: usize,
}

impl Default for LevenbergMarquardtSettings {
    fn default() -> Self {
        Self {
            rho_min: 1e-3,
            mu_factor: 1e-2,
            mu_ratio: 2.0,
            max_rejections: 10,
        }
    }
}

/// The full settings surface (§6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub algorithm: Algorithm,
    pub strategy: Strategy,
    pub n_threads: usize,
    pub thread_priority: i32,
    pub abs_tol_ode: f64,
    pub rel_tol_ode: f64,
    pub max_num_steps_per_second: usize,
    pub max_num_iterations: usize,
    pub min_rel_cost: f64,
    pub constraint_tolerance: f64,
    pub constraint_penalty_initial_value: f64,
    pub constraint_penalty_increase_rate: f64,
    pub use_feedback_policy: bool,
    pub debug_print_rollout: bool,
    pub display_info: bool,
    pub display_short_summary: bool,
    pub check_numerical_stability: bool,
    /// Risk-sensitive coefficient `theta`; only consulted when `algorithm`
    /// is `Slq`.
    pub risk_sensitive_coefficient: f64,
    /// §11: whether the dual solution is re-estimated after the first LQ
    /// pass of an iteration or only after the search step (§9 second Open
    /// Question).
    pub update_duals_before_lq: bool,
    pub line_search: LineSearchSettings,
    pub levenberg_marquardt: LevenbergMarquardtSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Ilqr,
            strategy: Strategy::LineSearch,
            n_threads: 1,
            thread_priority: 0,
            abs_tol_ode: 1e-9,
            rel_tol_ode: 1e-6,
            max_num_steps_per_second: 10_000,
            max_num_iterations: 100,
            min_rel_cost: 1e-3,
            constraint_tolerance: 1e-3,
            constraint_penalty_initial_value: 2.0,
            constraint_penalty_increase_rate: 2.0,
            use_feedback_policy: true,
            debug_print_rollout: false,
            display_info: false,
            display_short_summary: false,
            check_numerical_stability: true,
            risk_sensitive_coefficient: 0.0,
            update_duals_before_lq: false,
            line_search: LineSearchSettings::default(),
            levenberg_marquardt: LevenbergMarquardtSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::SettingsParse(e.to_string()))
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::SettingsParse(e.to_string()))?;
        Self::from_toml_str(&contents)
    }

    /// §7: validated once before the first iteration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_threads == 0 {
            return Err(ConfigError::NonPositiveThreadCount(self.n_threads));
        }
        if self.constraint_penalty_initial_value <= 0.0
            || self.constraint_penalty_increase_rate <= 1.0
        {
            return Err(ConfigError::InvalidPenaltyParameters {
                mu_penalty: self.constraint_penalty_initial_value,
                tau_penalty: self.constraint_penalty_increase_rate,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn zero_threads_is_rejected() {
        let mut settings = Settings::default();
        settings.n_threads = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::NonPositiveThreadCount(0))
        ));
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let settings = Settings::from_toml_str("n_threads = 4\nmax_num_iterations = 50\n").unwrap();
        assert_eq!(settings.n_threads, 4);
        assert_eq!(settings.max_num_iterations, 50);
        assert_eq!(settings.algorithm, Algorithm::Ilqr);
    }
}
