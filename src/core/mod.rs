//! The core module
pub mod config;
pub mod error;
pub mod estimators;
pub mod grid;
pub mod layout;

pub use config::{BootstrapConfig, CovarianceMode, SchedulerConfig, StepCost};
pub use error::{EngineError, EngineResult, OverlapSide};
pub use estimators::{BasicEstimators, ChainStatistics};
pub use grid::AlphaGrid;
pub use layout::{ComponentId, VectorLayout};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one of the two chains.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum EnsembleKind {
    /// The chain sampling the integrand whose integral is known.
    Reference,
    /// The chain sampling the integrand whose integral is sought.
    Target,
}

impl EnsembleKind {
    /// Both kinds, in the order they are stored.
    pub const ALL: [Self; 2] = [Self::Reference, Self::Target];

    /// Position of this chain in two-element arrays.
    pub const fn index(self) -> usize {
        match self {
            Self::Reference => 0,
            Self::Target => 1,
        }
    }

    /// The other chain.
    pub const fn other(self) -> Self {
        match self {
            Self::Reference => Self::Target,
            Self::Target => Self::Reference,
        }
    }
}

impl fmt::Display for EnsembleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// A Markov chain that the engine advances but never looks into.
///
/// The engine only needs the values measured at each new configuration and the ratio of the
/// other chain's unnormalized weight to this chain's, $\gamma = w_\mathrm{other} /
/// w_\mathrm{this}$, evaluated at the current configuration. A ratio of zero means the other
/// integrand vanishes here, an infinite ratio means this integrand does.
pub trait Ensemble {
    /// Performs one sampling step and writes the measured values into `values`, whose length is
    /// [`value_count`](Ensemble::value_count). The first value is the chain's primary value,
    /// further values of the target chain are auxiliary targets.
    fn advance(&mut self, values: &mut [f64]);

    /// Ratio of the other chain's weight to this chain's weight at the current configuration.
    fn weight_ratio(&self) -> f64;

    /// Number of values written by [`advance`](Ensemble::advance).
    fn value_count(&self) -> usize {
        1
    }

    /// Whether the current configuration has a non-zero weight in this chain.
    fn configuration_is_valid(&self) -> bool {
        true
    }
}

/// The estimated ratio of the target integral to the reference integral, together with its
/// standard error.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct RatioEstimate {
    value: f64,
    error: f64,
}

impl RatioEstimate {
    /// Constructor.
    pub const fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }

    /// The ratio.
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Its standard error.
    pub const fn error(&self) -> f64 {
        self.error
    }

    /// Error divided by the absolute value.
    pub fn relative_error(&self) -> f64 {
        self.error / self.value.abs()
    }

    /// Converts the ratio into the target integral given the closed-form value of the reference
    /// integral.
    pub fn scaled(&self, reference_integral: f64) -> Self {
        Self {
            value: self.value * reference_integral,
            error: self.error * reference_integral.abs(),
        }
    }
}

impl BasicEstimators<f64> for RatioEstimate {
    fn mean(&self) -> f64 {
        self.value
    }

    fn var(&self) -> f64 {
        self.error * self.error
    }
}

impl fmt::Display for RatioEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \u{b1} {}", self.value, self.error)
    }
}

/// Raw averages of the primary values of both chains, without any overlap normalization.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct FullResult {
    /// Average of the reference value in the reference chain.
    pub reference_average: f64,
    /// Its standard error.
    pub reference_error: f64,
    /// Average of the selected target value in the target chain.
    pub target_average: f64,
    /// Its standard error.
    pub target_error: f64,
}

/// Compute the number of super-steps replica `replica` of `n_replicas` performs, given the
/// total number `total_steps` of super-steps to perform combined on all replicas.
pub(crate) fn compute_steps_for_replica(
    replica: usize,
    n_replicas: usize,
    total_steps: u64,
) -> u64 {
    debug_assert!(replica < n_replicas);
    let n = n_replicas as u64;
    let r = replica as u64;
    let per_replica = (total_steps + n - 1) / n;

    // the last replicas might need fewer steps, or none at all
    total_steps.saturating_sub(r * per_replica).min(per_replica)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_steps_per_replica_simple() {
        let n_replicas = 3;
        let total_steps = 17;
        let steps = (0..n_replicas)
            .map(|replica| compute_steps_for_replica(replica, n_replicas, total_steps))
            .collect::<Vec<_>>();

        assert_eq!(steps, vec![6, 6, 5]);
        assert_eq!(total_steps, steps.into_iter().sum::<u64>());
    }

    #[test]
    fn test_steps_per_replica() {
        let n_replicas = 13;
        let total_steps = 16490248407;
        let total_steps_check: u64 = (0..n_replicas)
            .map(|replica| compute_steps_for_replica(replica, n_replicas, total_steps))
            .sum();
        assert_eq!(total_steps, total_steps_check);
    }

    #[test]
    fn test_steps_per_replica_more_replicas_than_steps() {
        let steps = (0..4)
            .map(|replica| compute_steps_for_replica(replica, 4, 2))
            .collect::<Vec<_>>();
        assert_eq!(steps, vec![1, 1, 0, 0]);
    }

    #[test]
    fn ensemble_kinds() {
        assert_eq!(EnsembleKind::Reference.other(), EnsembleKind::Target);
        assert_eq!(EnsembleKind::Target.index(), 1);
        assert_eq!(EnsembleKind::Target.to_string(), "target");
    }

    #[test]
    fn scaled_estimate() {
        let estimate = RatioEstimate::new(0.5, 0.01).scaled(-4.0);
        assert_approx_eq!(estimate.value(), -2.0, 1e-15);
        assert_approx_eq!(estimate.error(), 0.04, 1e-15);
        assert_approx_eq!(estimate.relative_error(), 0.02, 1e-15);
        assert_approx_eq!(estimate.std(), 0.04, 1e-15);
    }
}
