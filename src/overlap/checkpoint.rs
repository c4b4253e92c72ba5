//! Snapshots of a running scheduler.
use crate::accumulator::BlockRatioAccumulator;
use crate::core::{AlphaGrid, EnsembleKind};
use crate::overlap::SchedulerState;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A checkpoint saves the state of a [`DualChainScheduler`] after a super-step: its random number
/// generator, the accumulated statistics of both chains including incomplete blocks, the step
/// fraction and all step counters. Checkpoints can be used to resume production runs.
///
/// The chains themselves are owned by the caller and are not part of a checkpoint.
///
/// [`DualChainScheduler`]: crate::overlap::DualChainScheduler
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SchedulerCheckpoint<R> {
    pub(crate) rng: R,
    pub(crate) grid: AlphaGrid,
    pub(crate) accumulators: [BlockRatioAccumulator<f64>; 2],
    pub(crate) state: SchedulerState,
    pub(crate) warmed_up: bool,
    pub(crate) warmup_taken: u64,
    pub(crate) step_fraction: f64,
    pub(crate) adjust_step_fraction: bool,
    pub(crate) max_steps: u64,
    pub(crate) steps: u64,
    pub(crate) since_reset: u64,
    pub(crate) chain_steps: [u64; 2],
    pub(crate) chain_time: [Duration; 2],
    pub(crate) overlap_hits: [u64; 2],
}

impl<R> SchedulerCheckpoint<R> {
    /// Returns the random number generator at the time of the checkpoint.
    pub fn rng(&self) -> &R {
        &self.rng
    }

    /// Returns the grid of bias parameters.
    pub fn grid(&self) -> &AlphaGrid {
        &self.grid
    }

    /// Returns the accumulator of chain `kind`.
    pub fn accumulator(&self, kind: EnsembleKind) -> &BlockRatioAccumulator<f64> {
        &self.accumulators[kind.index()]
    }

    /// Returns the phase of the scheduler.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Returns the fraction of super-steps spent in the reference chain.
    pub fn step_fraction(&self) -> f64 {
        self.step_fraction
    }

    /// Returns the number of production super-steps.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Returns the number of production super-steps of chain `kind`.
    pub fn chain_steps(&self, kind: EnsembleKind) -> u64 {
        self.chain_steps[kind.index()]
    }
}
