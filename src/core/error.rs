//! Errors raised by the overlap sampling engine.
use crate::core::EnsembleKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Where the crossing of the reference and target overlap averages lies relative to the grid of
/// bias parameters, when it could not be found inside it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OverlapSide {
    /// The crossing lies below the smallest grid value.
    BelowGrid,
    /// The crossing lies above the largest grid value.
    AboveGrid,
    /// Neither ensemble produced a single configuration with non-zero weight in the other.
    Neither,
}

impl fmt::Display for OverlapSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BelowGrid => write!(f, "below the alpha grid"),
            Self::AboveGrid => write!(f, "above the alpha grid"),
            Self::Neither => write!(f, "in neither ensemble"),
        }
    }
}

/// Error type of the engine.
///
/// Statistics that merely lack data (fewer than two blocks) are not errors, they evaluate to
/// `NaN`. Everything listed here is structural and terminates the current run or bootstrap round.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The two ensembles never produced configurations with comparable weights for any bias
    /// parameter of the current grid.
    #[error("no overlap ({side}) for alpha in [{alpha_min}, {alpha_max}] after {steps} steps")]
    NoOverlap {
        /// Which side of the grid is starved.
        side: OverlapSide,
        /// Smallest grid value.
        alpha_min: f64,
        /// Largest grid value.
        alpha_max: f64,
        /// Number of super-steps taken when the condition was detected.
        steps: u64,
    },
    /// The ratio at the selected bias parameter is zero, `NaN` or infinite.
    #[error("convergence failure at alpha={alpha}: ratio evaluated to {value} after {steps} steps")]
    ConvergenceFailure {
        /// The bias parameter that was selected.
        alpha: f64,
        /// The offending value.
        value: f64,
        /// Number of super-steps taken when the condition was detected.
        steps: u64,
    },
    /// Writing the converged bias-parameter center failed.
    #[error("couldn't write alpha center to `{}`", path.display())]
    Persistence {
        /// The file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A configuration value violates an invariant.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A setter that changes the vector layout or the block width was called while data was held.
    #[error("accumulator holds data, call `reset` before changing its block size or alpha grid")]
    AccumulatorNotEmpty,
    /// The covariance of two components was requested but never tracked.
    #[error("covariance of components {first} and {second} is not tracked")]
    UntrackedPair {
        /// First component index.
        first: usize,
        /// Second component index.
        second: usize,
    },
    /// A component index does not exist in the vector layout.
    #[error("component {index} out of range for vector of width {width}")]
    ComponentOutOfRange {
        /// The requested index.
        index: usize,
        /// The width of the vector.
        width: usize,
    },
    /// A caller-supplied bias parameter lies outside the grid.
    #[error("alpha={alpha} outside of the grid [{min}, {max}]")]
    AlphaOutOfRange {
        /// The requested bias parameter.
        alpha: f64,
        /// Smallest grid value.
        min: f64,
        /// Largest grid value.
        max: f64,
    },
    /// An ensemble reported an invalid configuration before sampling started.
    #[error("the {kind} ensemble does not start from a valid configuration")]
    InvalidEnsemble {
        /// The offending ensemble.
        kind: EnsembleKind,
    },
    /// A configuration file could not be parsed.
    #[error("unable to parse configuration")]
    ConfigParse(#[from] serde_json::Error),
    /// A configuration file could not be read.
    #[error("unable to read configuration `{}`", path.display())]
    ConfigRead {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type for `Result<T, EngineError>`.
pub type EngineResult<T> = Result<T, EngineError>;
