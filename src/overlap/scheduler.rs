//! Interleaving of the reference and target chains.
use crate::accumulator::BlockRatioAccumulator;
use crate::callbacks::{Callback, Progress};
use crate::core::{
    AlphaGrid, ChainStatistics, CovarianceMode, EngineError, EngineResult, Ensemble,
    EnsembleKind, OverlapSide, SchedulerConfig, StepCost, VectorLayout,
};
use crate::overlap::{OverlapCoordinator, OverlapWeightTransform, SchedulerCheckpoint};
use crate::report::Report;
use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Phase of a [`DualChainScheduler`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SchedulerState {
    /// Data is taken and discarded.
    Warmup,
    /// Data is accumulated.
    Production,
    /// The step or time budget is exhausted.
    Done,
}

fn accumulator_for(
    layout: VectorLayout,
    block_size: usize,
    covariance: &CovarianceMode,
) -> EngineResult<BlockRatioAccumulator<f64>> {
    match covariance {
        CovarianceMode::Full => {
            BlockRatioAccumulator::with_full_covariance(layout.width(), block_size)
        }
        CovarianceMode::Required => {
            BlockRatioAccumulator::new(layout.width(), block_size, &layout.required_pairs())
        }
        CovarianceMode::Pairs(extra) => {
            let mut pairs = layout.required_pairs();
            for &(i, j) in extra {
                if i.max(j) >= layout.width() {
                    return Err(EngineError::ComponentOutOfRange {
                        index: i.max(j),
                        width: layout.width(),
                    });
                }
                pairs.push((i, j));
            }
            BlockRatioAccumulator::new(layout.width(), block_size, &pairs)
        }
    }
}

/// Advances two borrowed chains with an adaptive split of the sampling effort and feeds their
/// samples through the overlap transforms into the accumulators it owns.
///
/// Every super-step one chain is chosen, randomly with probability equal to the step fraction
/// for the reference chain, or deterministically in aggressive mode, and advanced for
/// `sub_steps` raw samples. Every `event_interval` super-steps the step fraction moves towards
/// the split that minimizes the final error for the measured per-sample variances and costs.
pub struct DualChainScheduler<'a, R> {
    config: SchedulerConfig,
    ensembles: [&'a mut dyn Ensemble; 2],
    grid: AlphaGrid,
    transforms: [OverlapWeightTransform; 2],
    accumulators: [BlockRatioAccumulator<f64>; 2],
    samples: [Vec<f64>; 2],
    rng: R,
    state: SchedulerState,
    warmed_up: bool,
    warmup_taken: u64,
    step_fraction: f64,
    adjust_step_fraction: bool,
    max_steps: u64,
    steps: u64,
    since_reset: u64,
    chain_steps: [u64; 2],
    chain_time: [Duration; 2],
    overlap_hits: [u64; 2],
}

impl<'a, R: Rng> DualChainScheduler<'a, R> {
    /// Creates a scheduler for the `reference` and `target` chains, which must start from valid
    /// configurations.
    pub fn new(
        reference: &'a mut dyn Ensemble,
        target: &'a mut dyn Ensemble,
        config: SchedulerConfig,
        rng: R,
    ) -> EngineResult<Self> {
        config.validate()?;

        for (kind, ensemble) in EnsembleKind::ALL.iter().zip(&[&*reference, &*target]) {
            if !ensemble.configuration_is_valid() {
                return Err(EngineError::InvalidEnsemble { kind: *kind });
            }
            if ensemble.value_count() == 0 {
                return Err(EngineError::InvalidConfiguration(format!(
                    "the {} ensemble must measure at least one value",
                    kind
                )));
            }
        }

        let grid = AlphaGrid::new(config.alpha_center, config.alpha_span, config.alpha_count)?;
        let values = [reference.value_count(), target.value_count()];
        let transforms = [
            OverlapWeightTransform::new(EnsembleKind::Reference, grid.clone(), values[0]),
            OverlapWeightTransform::new(EnsembleKind::Target, grid.clone(), values[1]),
        ];
        let accumulators = [
            accumulator_for(transforms[0].layout(), config.block_size, &config.covariance)?,
            accumulator_for(transforms[1].layout(), config.block_size, &config.covariance)?,
        ];
        let state = if config.warmup_steps > 0 {
            SchedulerState::Warmup
        } else {
            SchedulerState::Production
        };

        Ok(Self {
            ensembles: [reference, target],
            grid,
            transforms,
            accumulators,
            samples: [vec![0.0; values[0]], vec![0.0; values[1]]],
            rng,
            state,
            warmed_up: config.warmup_steps == 0,
            warmup_taken: 0,
            step_fraction: config.initial_step_fraction,
            adjust_step_fraction: config.adjust_step_fraction,
            max_steps: config.max_steps,
            steps: 0,
            since_reset: 0,
            chain_steps: [0; 2],
            chain_time: [Duration::default(); 2],
            overlap_hits: [0; 2],
            config,
        })
    }

    /// The configuration the scheduler was created with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current phase.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Number of production super-steps since the last reset.
    pub fn step_count(&self) -> u64 {
        self.steps
    }

    /// Number of production super-steps spent in chain `kind` since the last reset.
    pub fn chain_step_count(&self, kind: EnsembleKind) -> u64 {
        self.chain_steps[kind.index()]
    }

    /// Fraction of super-steps spent in the reference chain.
    pub fn step_fraction(&self) -> f64 {
        self.step_fraction
    }

    /// Overrides the fraction of super-steps spent in the reference chain.
    pub fn set_step_fraction(&mut self, fraction: f64) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(EngineError::InvalidConfiguration(format!(
                "step fraction must lie in [0, 1], got {}",
                fraction
            )));
        }
        self.step_fraction = fraction;
        Ok(())
    }

    /// Whether the step fraction is adapted.
    pub fn adjust_step_fraction(&self) -> bool {
        self.adjust_step_fraction
    }

    /// Enables or disables adaptation of the step fraction.
    pub fn set_adjust_step_fraction(&mut self, adjust: bool) {
        self.adjust_step_fraction = adjust;
    }

    /// Number of production super-steps after which [`run_to_completion`] stops.
    ///
    /// [`run_to_completion`]: DualChainScheduler::run_to_completion
    pub fn max_steps(&self) -> u64 {
        self.max_steps
    }

    /// Sets the step budget.
    pub fn set_max_steps(&mut self, max_steps: u64) {
        self.max_steps = max_steps;
    }

    /// The grid of bias parameters.
    pub fn grid(&self) -> &AlphaGrid {
        &self.grid
    }

    /// The accumulator of chain `kind`.
    pub fn accumulator(&self, kind: EnsembleKind) -> &BlockRatioAccumulator<f64> {
        &self.accumulators[kind.index()]
    }

    fn ensure_empty(&self) -> EngineResult<()> {
        if self.accumulators.iter().all(BlockRatioAccumulator::is_empty) {
            Ok(())
        } else {
            Err(EngineError::AccumulatorNotEmpty)
        }
    }

    /// Replaces the grid of bias parameters. The accumulators must be empty.
    pub fn set_alpha_grid(&mut self, grid: AlphaGrid) -> EngineResult<()> {
        self.ensure_empty()?;
        let block_size = self.accumulators[0].block_size();
        for &kind in &EnsembleKind::ALL {
            let i = kind.index();
            let transform = OverlapWeightTransform::new(kind, grid.clone(), self.samples[i].len());
            self.accumulators[i] =
                accumulator_for(transform.layout(), block_size, &self.config.covariance)?;
            self.transforms[i] = transform;
        }
        self.grid = grid;
        Ok(())
    }

    /// Pins production to the single bias parameter `center`. The accumulators must be empty.
    pub fn set_alpha(&mut self, center: f64) -> EngineResult<()> {
        self.set_alpha_grid(AlphaGrid::new(center, 1.0, 1)?)
    }

    /// Changes the block size of both accumulators. The accumulators must be empty.
    pub fn set_block_size(&mut self, block_size: usize) -> EngineResult<()> {
        self.ensure_empty()?;
        for accumulator in &mut self.accumulators {
            accumulator.set_block_size(block_size)?;
        }
        Ok(())
    }

    /// Discards all accumulated data and step counters, keeping the chains' configurations and the
    /// step fraction. A scheduler that has finished its warmup does not warm up again.
    pub fn reset(&mut self) {
        self.clear_statistics();
        self.state = if self.warmed_up {
            SchedulerState::Production
        } else {
            SchedulerState::Warmup
        };
        self.warmup_taken = 0;
    }

    fn clear_statistics(&mut self) {
        for accumulator in &mut self.accumulators {
            accumulator.reset();
        }
        self.steps = 0;
        self.since_reset = 0;
        self.chain_steps = [0; 2];
        self.chain_time = [Duration::default(); 2];
        self.overlap_hits = [0; 2];
    }

    /// A view combining the statistics of both chains.
    pub fn coordinator(&self) -> EngineResult<OverlapCoordinator<'_>> {
        Ok(OverlapCoordinator::new(
            &self.grid,
            self.accumulators[0].statistics(),
            self.accumulators[1].statistics(),
        )?
        .with_steps(self.steps))
    }

    /// Summary of the current estimate and the statistics of both chains.
    pub fn report(&self) -> EngineResult<Report> {
        Ok(Report::new(&self.coordinator()?, self.steps, Some(self.step_fraction)))
    }

    /// Saves the state of the scheduler, see [`SchedulerCheckpoint`].
    pub fn checkpoint(&self) -> SchedulerCheckpoint<R>
    where
        R: Clone,
    {
        SchedulerCheckpoint {
            rng: self.rng.clone(),
            grid: self.grid.clone(),
            accumulators: self.accumulators.clone(),
            state: self.state,
            warmed_up: self.warmed_up,
            warmup_taken: self.warmup_taken,
            step_fraction: self.step_fraction,
            adjust_step_fraction: self.adjust_step_fraction,
            max_steps: self.max_steps,
            steps: self.steps,
            since_reset: self.since_reset,
            chain_steps: self.chain_steps,
            chain_time: self.chain_time,
            overlap_hits: self.overlap_hits,
        }
    }

    /// Resumes the run saved in `checkpoint`. The chains must be in the state they had when the
    /// checkpoint was taken, which is the caller's responsibility. Fails without changing the
    /// scheduler if the checkpoint does not fit the chains' number of values.
    pub fn restore(&mut self, checkpoint: SchedulerCheckpoint<R>) -> EngineResult<()> {
        for &kind in &EnsembleKind::ALL {
            let i = kind.index();
            let accumulator = &checkpoint.accumulators[i];
            let layout = VectorLayout::new(self.samples[i].len(), checkpoint.grid.len());
            if accumulator.width() != layout.width() || !accumulator.is_consistent() {
                return Err(EngineError::InvalidConfiguration(format!(
                    "checkpoint of the {} chain has width {}, expected {}",
                    kind,
                    accumulator.width(),
                    layout.width()
                )));
            }
        }
        if !(0.0..=1.0).contains(&checkpoint.step_fraction) {
            return Err(EngineError::InvalidConfiguration(format!(
                "checkpoint step fraction {} outside of [0, 1]",
                checkpoint.step_fraction
            )));
        }

        let SchedulerCheckpoint {
            rng,
            grid,
            accumulators,
            state,
            warmed_up,
            warmup_taken,
            step_fraction,
            adjust_step_fraction,
            max_steps,
            steps,
            since_reset,
            chain_steps,
            chain_time,
            overlap_hits,
        } = checkpoint;

        let values = [self.samples[0].len(), self.samples[1].len()];
        self.transforms = [
            OverlapWeightTransform::new(EnsembleKind::Reference, grid.clone(), values[0]),
            OverlapWeightTransform::new(EnsembleKind::Target, grid.clone(), values[1]),
        ];
        self.grid = grid;
        self.accumulators = accumulators;
        self.rng = rng;
        self.state = state;
        self.warmed_up = warmed_up;
        self.warmup_taken = warmup_taken;
        self.step_fraction = step_fraction;
        self.adjust_step_fraction = adjust_step_fraction;
        self.max_steps = max_steps;
        self.steps = steps;
        self.since_reset = since_reset;
        self.chain_steps = chain_steps;
        self.chain_time = chain_time;
        self.overlap_hits = overlap_hits;

        info!("resuming from checkpoint after {} steps", self.steps);
        Ok(())
    }

    /// Consumes the scheduler and returns the grid and the statistics of both chains.
    pub fn into_statistics(self) -> (AlphaGrid, [ChainStatistics<f64>; 2]) {
        let [reference, target] = self.accumulators;
        (
            self.grid,
            [reference.into_statistics(), target.into_statistics()],
        )
    }

    fn cost_per_sample(&self, kind: EnsembleKind) -> f64 {
        match self.config.step_cost {
            StepCost::Uniform => 1.0,
            StepCost::WallClock => {
                let i = kind.index();
                let samples = self.accumulators[i].sample_count();
                self.chain_time[i].as_secs_f64() / samples as f64
            }
        }
    }

    /// The fraction of super-steps in the reference chain that minimizes the error of the final
    /// ratio for a fixed amount of computing time, given the relative errors and per-sample costs
    /// measured so far:
    ///
    /// $$ f = \left( 1 + \sqrt{\frac{s_1 c_0}{s_0 c_1}} \right)^{-1}, \qquad s_i = n_i
    /// \epsilon_i^2 $$
    ///
    /// The cheaper chain gets more super-steps. Relative errors that are `NaN` or above 100% count
    /// as 100%, unmeasurable costs count as equal. Returns `NaN` while either chain has fewer than
    /// two blocks or no overlap estimate exists yet.
    pub fn ideal_step_fraction(&self) -> f64 {
        if self.accumulators.iter().any(|a| a.block_count() < 2) {
            return f64::NAN;
        }
        let coordinator = match self.coordinator() {
            Ok(coordinator) => coordinator,
            Err(_) => return f64::NAN,
        };
        let alpha = match coordinator.best_alpha() {
            Ok(alpha) => alpha,
            Err(_) => return f64::NAN,
        };
        let reference = if self.config.ignore_reference_average {
            coordinator.reference_overlap_for_alpha(alpha)
        } else {
            coordinator.reference_ratio_for_alpha(alpha)
        };
        let target = coordinator.target_ratio_for_alpha(alpha, 0);
        let (reference, target) = match (reference, target) {
            (Ok(reference), Ok(target)) => (reference, target),
            _ => return f64::NAN,
        };

        let capped = |e: f64| if e.is_nan() || e > 1.0 { 1.0 } else { e };
        let spread = |kind: EnsembleKind, e: f64| {
            let n = self.accumulators[kind.index()].sample_count() as f64;
            capped(e).powi(2) * n
        };
        let s0 = spread(EnsembleKind::Reference, reference.relative_error());
        let s1 = spread(EnsembleKind::Target, target.relative_error());

        let (c0, c1) = (
            self.cost_per_sample(EnsembleKind::Reference),
            self.cost_per_sample(EnsembleKind::Target),
        );
        let cost_ratio = if c0 > 0.0 && c1 > 0.0 && (c0 / c1).is_finite() {
            c0 / c1
        } else {
            1.0
        };

        if s0 == 0.0 && s1 == 0.0 {
            return 0.5;
        }
        1.0 / (1.0 + (s1 / s0 * cost_ratio).sqrt())
    }

    fn update_step_fraction(&mut self) {
        if !self.adjust_step_fraction {
            return;
        }
        let ideal = self.ideal_step_fraction();
        if ideal.is_nan() {
            debug!(
                "step {}: no ideal step fraction yet, keeping {}",
                self.steps, self.step_fraction
            );
            return;
        }
        let min = self.config.min_step_fraction;
        let fraction = self.step_fraction + self.config.adjust_rate * (ideal - self.step_fraction);
        self.step_fraction = fraction.max(min).min(1.0 - min);
        debug!(
            "step {}: ideal step fraction {}, adjusted to {}",
            self.steps, ideal, self.step_fraction
        );
    }

    fn choose(&mut self) -> EnsembleKind {
        if self.config.aggressive {
            // the reference chain runs whenever it lags behind its share
            let total = (self.chain_steps[0] + self.chain_steps[1] + 1) as f64;
            if (self.chain_steps[0] as f64) < self.step_fraction * total {
                EnsembleKind::Reference
            } else {
                EnsembleKind::Target
            }
        } else if self.rng.gen::<f64>() < self.step_fraction {
            EnsembleKind::Reference
        } else {
            EnsembleKind::Target
        }
    }

    /// Performs one super-step: advances the chosen chain for `sub_steps` samples and routes each
    /// sample through its overlap transform into its accumulator.
    pub fn step(&mut self) -> EngineResult<()> {
        let kind = self.choose();
        let i = kind.index();

        let start = Instant::now();
        for _ in 0..self.config.sub_steps {
            self.ensembles[i].advance(&mut self.samples[i]);
            let gamma = self.ensembles[i].weight_ratio();
            if gamma > 0.0 && gamma.is_finite() {
                self.overlap_hits[i] += 1;
            }
            self.transforms[i].push(&self.samples[i], gamma, &mut self.accumulators[i]);
        }
        self.chain_time[i] += start.elapsed();
        self.chain_steps[i] += 1;
        self.since_reset += 1;

        match self.state {
            SchedulerState::Warmup => {
                self.warmup_taken += 1;
                if self.warmup_taken >= self.config.warmup_steps {
                    self.clear_statistics();
                    self.warmed_up = true;
                    self.state = SchedulerState::Production;
                }
                return Ok(());
            }
            SchedulerState::Production | SchedulerState::Done => self.steps += 1,
        }

        let window = self.config.no_overlap_window;
        if window > 0 && self.since_reset >= window && self.overlap_hits == [0, 0] {
            return Err(EngineError::NoOverlap {
                side: OverlapSide::Neither,
                alpha_min: self.grid.min(),
                alpha_max: self.grid.max(),
                steps: self.steps,
            });
        }

        if self.steps % self.config.event_interval == 0 {
            self.update_step_fraction();
        }

        Ok(())
    }

    /// Runs warmup and production until the step budget or the time budget is exhausted, calling
    /// `callback` every `event_interval` production super-steps.
    pub fn run_to_completion(&mut self, callback: &impl Callback) -> EngineResult<()> {
        let started = Instant::now();
        let budget = self.config.max_seconds.map(Duration::from_secs_f64);

        if self.state == SchedulerState::Done && self.steps < self.max_steps {
            self.state = SchedulerState::Production;
        }

        loop {
            if self.state == SchedulerState::Production && self.steps >= self.max_steps {
                self.state = SchedulerState::Done;
            }
            if let Some(budget) = budget {
                if started.elapsed() >= budget {
                    self.state = SchedulerState::Done;
                }
            }
            if self.state == SchedulerState::Done {
                return Ok(());
            }

            let production = self.state == SchedulerState::Production;
            self.step()?;

            if production && self.steps % self.config.event_interval == 0 {
                let progress = Progress {
                    steps: self.steps,
                    max_steps: self.max_steps,
                    step_fraction: self.step_fraction,
                    coordinator: self.coordinator()?,
                };
                callback.print(&progress);
            }
        }
    }
}
