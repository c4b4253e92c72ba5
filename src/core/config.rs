//! Run configuration of the scheduler and the bootstrap.
use crate::core::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fs;
use std::path::{Path, PathBuf};

/// How the cost of a single step of each chain is measured when balancing the two chains.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum StepCost {
    /// Measure the wall-clock time spent in each chain.
    WallClock,
    /// Assume steps of both chains cost the same.
    Uniform,
}

/// Which covariances of the biased vectors are tracked.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum CovarianceMode {
    /// Only the pairs needed for ratio errors.
    Required,
    /// Every pair, so that full covariance matrices can be reported.
    Full,
    /// The pairs needed for ratio errors plus the listed ones.
    Pairs(Vec<(usize, usize)>),
}

/// Settings of the [`DualChainScheduler`](crate::overlap::DualChainScheduler).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of bias parameters in the production grid.
    pub alpha_count: usize,
    /// Center of the production grid.
    pub alpha_center: f64,
    /// Multiplicative half-width of the production grid, must exceed one when `alpha_count > 1`.
    pub alpha_span: f64,
    /// Number of raw samples per block.
    pub block_size: usize,
    /// Raw samples taken from the chosen chain per super-step.
    pub sub_steps: usize,
    /// Number of production super-steps.
    pub max_steps: u64,
    /// Optional wall-clock budget in seconds, checked after every super-step.
    pub max_seconds: Option<f64>,
    /// Super-steps whose data is discarded before production starts.
    pub warmup_steps: u64,
    /// Super-steps between step-fraction adjustments and callback invocations.
    pub event_interval: u64,
    /// Whether the fraction of super-steps spent in the reference chain is adapted.
    pub adjust_step_fraction: bool,
    /// Interleave the chains deterministically instead of choosing them at random.
    pub aggressive: bool,
    /// Fraction of super-steps spent in the reference chain at the start.
    pub initial_step_fraction: f64,
    /// Fraction of the distance to the ideal split covered per adjustment.
    pub adjust_rate: f64,
    /// The step fraction is kept within `[min_step_fraction, 1 - min_step_fraction]`.
    pub min_step_fraction: f64,
    /// How step costs are measured.
    pub step_cost: StepCost,
    /// Super-steps after which a run where neither chain visited the overlap region fails, zero
    /// disables the check.
    pub no_overlap_window: u64,
    /// Balance the chains using only the reference overlap error, for when the reference average
    /// is known exactly.
    pub ignore_reference_average: bool,
    /// Tracked covariances.
    pub covariance: CovarianceMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            alpha_count: 1,
            alpha_center: 1.0,
            alpha_span: std::f64::consts::E,
            block_size: 1000,
            sub_steps: 1000,
            max_steps: 1000,
            max_seconds: None,
            warmup_steps: 0,
            event_interval: 1,
            adjust_step_fraction: true,
            aggressive: false,
            initial_step_fraction: 0.5,
            adjust_rate: 0.1,
            min_step_fraction: 0.01,
            step_cost: StepCost::WallClock,
            no_overlap_window: 100,
            ignore_reference_average: false,
            covariance: CovarianceMode::Required,
        }
    }
}

fn invalid(message: String) -> EngineError {
    EngineError::InvalidConfiguration(message)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> EngineResult<T> {
    let content = fs::read_to_string(path).map_err(|source| EngineError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

impl SchedulerConfig {
    /// Parses and validates a configuration in JSON format. Missing fields take their default.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Checks all invariants.
    pub fn validate(&self) -> EngineResult<()> {
        if self.alpha_count == 0 {
            return Err(invalid("alpha_count must be at least one".to_string()));
        }
        if !(self.alpha_center.is_finite() && self.alpha_center > 0.0) {
            return Err(invalid(format!(
                "alpha_center must be finite and positive, got {}",
                self.alpha_center
            )));
        }
        if self.alpha_count > 1 && !(self.alpha_span.is_finite() && self.alpha_span > 1.0) {
            return Err(invalid(format!(
                "alpha_span must be larger than one for {} alphas, got {}",
                self.alpha_count, self.alpha_span
            )));
        }
        if self.block_size == 0 || self.sub_steps == 0 || self.event_interval == 0 {
            return Err(invalid(
                "block_size, sub_steps and event_interval must be positive".to_string(),
            ));
        }
        if let Some(seconds) = self.max_seconds {
            if !(seconds > 0.0) {
                return Err(invalid(format!("max_seconds must be positive, got {}", seconds)));
            }
        }
        if !(self.min_step_fraction >= 0.0 && self.min_step_fraction < 0.5) {
            return Err(invalid(format!(
                "min_step_fraction must lie in [0, 0.5), got {}",
                self.min_step_fraction
            )));
        }
        if !(self.initial_step_fraction >= self.min_step_fraction
            && self.initial_step_fraction <= 1.0 - self.min_step_fraction)
        {
            return Err(invalid(format!(
                "initial_step_fraction {} outside of [{}, {}]",
                self.initial_step_fraction,
                self.min_step_fraction,
                1.0 - self.min_step_fraction
            )));
        }
        if !(self.adjust_rate > 0.0 && self.adjust_rate <= 1.0) {
            return Err(invalid(format!(
                "adjust_rate must lie in (0, 1], got {}",
                self.adjust_rate
            )));
        }
        Ok(())
    }
}

/// Settings of the [`ReferenceParameterBootstrap`](crate::overlap::ReferenceParameterBootstrap).
///
/// Grid widths are given as natural logarithms of the multiplicative span, a wide search with
/// `wide_log_span = 30` covers $\alpha \in [c e^{-30}, c e^{30}]$.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Super-steps of every pilot run.
    pub init_steps: u64,
    /// Center of the first wide search.
    pub initial_center: f64,
    /// Number of bias parameters of the wide search grid.
    pub wide_alpha_count: usize,
    /// Logarithmic half-width of the wide search grid.
    pub wide_log_span: f64,
    /// Number of bias parameters of the narrowing grids.
    pub narrow_alpha_count: usize,
    /// Logarithmic half-width of the first narrowing grid, halved in every further round.
    pub narrow_log_span: f64,
    /// Number of narrowing rounds after the wide search.
    pub narrow_rounds: usize,
    /// Factor applied to the logarithmic span when the crossing lies outside of the grid.
    pub widen_factor: f64,
    /// Number of re-centered or widened searches before giving up.
    pub max_widen_attempts: usize,
    /// Smallest block size of the pilot runs.
    pub min_block_size: usize,
    /// Largest block size of the pilot runs.
    pub max_block_size: usize,
    /// File holding the converged center of previous runs.
    pub center_file: Option<PathBuf>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            init_steps: 1000,
            initial_center: 1.0,
            wide_alpha_count: 21,
            wide_log_span: 30.0,
            narrow_alpha_count: 15,
            narrow_log_span: 4.0,
            narrow_rounds: 2,
            widen_factor: 2.0,
            max_widen_attempts: 4,
            min_block_size: 1000,
            max_block_size: 1_000_000,
            center_file: None,
        }
    }
}

impl BootstrapConfig {
    /// Parses and validates a configuration in JSON format. Missing fields take their default.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Checks all invariants.
    pub fn validate(&self) -> EngineResult<()> {
        if self.init_steps == 0 {
            return Err(invalid("init_steps must be positive".to_string()));
        }
        if !(self.initial_center.is_finite() && self.initial_center > 0.0) {
            return Err(invalid(format!(
                "initial_center must be finite and positive, got {}",
                self.initial_center
            )));
        }
        if self.wide_alpha_count < 2 || self.narrow_alpha_count < 2 {
            return Err(invalid(
                "bootstrap grids need at least two alphas".to_string(),
            ));
        }
        for &(name, span) in &[
            ("wide_log_span", self.wide_log_span),
            ("narrow_log_span", self.narrow_log_span),
        ] {
            if !(span.is_finite() && span > 0.0) {
                return Err(invalid(format!("{} must be positive, got {}", name, span)));
            }
        }
        if !(self.widen_factor.is_finite() && self.widen_factor >= 1.0) {
            return Err(invalid(format!(
                "widen_factor must be at least one, got {}",
                self.widen_factor
            )));
        }
        if self.min_block_size == 0 || self.min_block_size > self.max_block_size {
            return Err(invalid(format!(
                "block size bounds [{}, {}] are invalid",
                self.min_block_size, self.max_block_size
            )));
        }
        Ok(())
    }

    /// Block size of a pilot run: a thousandth of the raw samples it takes, clamped to the
    /// configured bounds.
    pub fn pilot_block_size(&self, sub_steps: usize) -> usize {
        let raw = self.init_steps.saturating_mul(sub_steps as u64) / 1000;
        let raw = usize::try_from(raw).unwrap_or(usize::MAX);
        raw.max(self.min_block_size).min(self.max_block_size)
    }
}
