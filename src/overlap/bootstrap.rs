//! Search for a bias-parameter window before production.
use crate::callbacks::SinkCallback;
use crate::core::{AlphaGrid, BootstrapConfig, EngineError, EngineResult, OverlapSide};
use crate::overlap::DualChainScheduler;
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A file holding the converged center of the bias-parameter grid as a single decimal number.
#[derive(Clone, Debug)]
pub struct CenterStore {
    path: PathBuf,
}

impl CenterStore {
    /// Constructor.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the center. A missing file is expected before the first run; unreadable or
    /// meaningless contents are logged and otherwise treated the same.
    pub fn load(&self) -> Option<f64> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no alpha center file at `{}`", self.path.display());
                return None;
            }
            Err(err) => {
                warn!("couldn't read alpha center from `{}`: {}", self.path.display(), err);
                return None;
            }
        };

        match content.trim().parse::<f64>() {
            Ok(center) if center.is_finite() && center > 0.0 => Some(center),
            _ => {
                warn!(
                    "ignoring alpha center file `{}` with contents {:?}",
                    self.path.display(),
                    content.trim()
                );
                None
            }
        }
    }

    /// Writes the center, replacing previous contents.
    pub fn save(&self, center: f64) -> EngineResult<()> {
        fs::write(&self.path, format!("{}\n", center)).map_err(|source| EngineError::Persistence {
            path: self.path.clone(),
            source,
        })
    }
}

/// Phase of the bootstrap.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum BootstrapPhase {
    /// Nothing is known about the center yet.
    NoEstimate,
    /// A pilot run on a grid spanning many decades.
    WideSearch,
    /// The given narrowing round, counting from zero.
    Narrow(usize),
    /// The center is known.
    Converged,
}

/// Where the bootstrap stands. Every transition returns a new state instead of changing the
/// previous one.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BootstrapState {
    phase: BootstrapPhase,
    center: f64,
    log_span: f64,
    widen_attempts: usize,
    pilot_steps: u64,
    from_file: bool,
}

impl BootstrapState {
    /// Current phase.
    pub fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    /// Current estimate of the center, the starting guess before the first pilot run.
    pub fn center(&self) -> f64 {
        self.center
    }

    /// Logarithmic half-width of the grid of the next pilot run.
    pub fn log_span(&self) -> f64 {
        self.log_span
    }

    /// Number of re-centered or widened searches so far.
    pub fn widen_attempts(&self) -> usize {
        self.widen_attempts
    }

    /// Super-steps spent in pilot runs.
    pub fn pilot_steps(&self) -> u64 {
        self.pilot_steps
    }

    /// Whether the center was read from a file instead of being searched for.
    pub fn from_file(&self) -> bool {
        self.from_file
    }

    fn with_phase(&self, phase: BootstrapPhase, center: f64, log_span: f64) -> Self {
        Self {
            phase,
            center,
            log_span,
            ..self.clone()
        }
    }
}

/// Locates a usable center for the bias-parameter grid with short pilot runs of a scheduler.
///
/// A wide search on a grid covering $[c e^{-s}, c e^{s}]$ with an even split between both chains
/// finds a first estimate, which successive narrowing rounds with halved spans refine. Crossings
/// outside of a grid re-center the search at the grid's edge with a widened span, up to a bounded
/// number of attempts. Once converged the center is persisted and the scheduler is configured for
/// production.
#[derive(Clone, Debug)]
pub struct ReferenceParameterBootstrap {
    config: BootstrapConfig,
    store: Option<CenterStore>,
}

impl ReferenceParameterBootstrap {
    /// Constructor.
    pub fn new(config: BootstrapConfig) -> EngineResult<Self> {
        config.validate()?;
        let store = config.center_file.as_ref().map(CenterStore::new);
        Ok(Self { config, store })
    }

    /// The configuration.
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// The state before anything is known.
    pub fn initial_state(&self) -> BootstrapState {
        BootstrapState {
            phase: BootstrapPhase::NoEstimate,
            center: self.config.initial_center,
            log_span: self.config.wide_log_span,
            widen_attempts: 0,
            pilot_steps: 0,
            from_file: false,
        }
    }

    /// Performs one transition of the state machine, running a pilot on `scheduler` where
    /// needed. A converged state is returned unchanged.
    pub fn advance<R: Rng>(
        &self,
        state: &BootstrapState,
        scheduler: &mut DualChainScheduler<'_, R>,
    ) -> EngineResult<BootstrapState> {
        match state.phase {
            BootstrapPhase::NoEstimate => {
                if let Some(center) = self.store.as_ref().and_then(CenterStore::load) {
                    info!("setting alpha center (from file) to {}", center);
                    let mut next = state.with_phase(BootstrapPhase::Converged, center, 0.0);
                    next.from_file = true;
                    return Ok(next);
                }
                info!("searching alpha center around {}", state.center);
                Ok(state.with_phase(
                    BootstrapPhase::WideSearch,
                    state.center,
                    self.config.wide_log_span,
                ))
            }
            BootstrapPhase::WideSearch => {
                let grid = AlphaGrid::new(
                    state.center,
                    state.log_span.exp(),
                    self.config.wide_alpha_count,
                )?;
                let (estimate, next) = self.pilot(state, scheduler, grid)?;
                let estimate = match estimate {
                    Ok(estimate) => estimate,
                    Err(err) => return self.widen(&next, err),
                };

                // crossings at the very edge of the grid are not trusted
                let offset = (estimate / state.center).ln();
                if offset.abs() > state.log_span - 0.01 {
                    info!("guess for alpha center ({}) is at the edge of the grid", estimate);
                    let side = if offset < 0.0 {
                        OverlapSide::BelowGrid
                    } else {
                        OverlapSide::AboveGrid
                    };
                    return self.retry(&next, estimate, state.log_span, side);
                }

                info!("setting initial alpha center to {}", estimate);
                if self.config.narrow_rounds == 0 {
                    return Ok(next.with_phase(BootstrapPhase::Converged, estimate, 0.0));
                }
                Ok(next.with_phase(
                    BootstrapPhase::Narrow(0),
                    estimate,
                    self.config.narrow_log_span,
                ))
            }
            BootstrapPhase::Narrow(round) => {
                let grid = AlphaGrid::new(
                    state.center,
                    state.log_span.exp(),
                    self.config.narrow_alpha_count,
                )?;
                let (estimate, next) = self.pilot(state, scheduler, grid)?;
                let estimate = match estimate {
                    Ok(estimate) => estimate,
                    Err(err) => return self.widen(&next, err),
                };

                info!("narrowed alpha center to {} (round {})", estimate, round + 1);
                if round + 1 >= self.config.narrow_rounds {
                    Ok(next.with_phase(BootstrapPhase::Converged, estimate, 0.0))
                } else {
                    Ok(next.with_phase(
                        BootstrapPhase::Narrow(round + 1),
                        estimate,
                        state.log_span / 2.0,
                    ))
                }
            }
            BootstrapPhase::Converged => Ok(state.clone()),
        }
    }

    /// Runs the state machine to convergence, persists the center unless it was read from the
    /// file and configures `scheduler` for production around it. Nothing is written if any step
    /// fails.
    pub fn run<R: Rng>(
        &self,
        scheduler: &mut DualChainScheduler<'_, R>,
    ) -> EngineResult<BootstrapState> {
        let mut state = self.initial_state();
        while state.phase != BootstrapPhase::Converged {
            state = self.advance(&state, scheduler)?;
        }

        if !state.from_file {
            if let Some(store) = &self.store {
                store.save(state.center)?;
                info!("alpha center {} written to `{}`", state.center, store.path().display());
            }
        }

        let (span, count, block_size, max_steps) = {
            let config = scheduler.config();
            (config.alpha_span, config.alpha_count, config.block_size, config.max_steps)
        };
        scheduler.reset();
        scheduler.set_alpha_grid(AlphaGrid::new(state.center, span, count)?)?;
        scheduler.set_block_size(block_size)?;
        scheduler.set_max_steps(max_steps);

        Ok(state)
    }

    /// Runs a pilot on `grid` with an even split of the effort and returns the crossing of the
    /// overlap averages, validated to be finite and non-zero. Failures to find the crossing are
    /// returned in the inner result, everything else is fatal.
    fn pilot<R: Rng>(
        &self,
        state: &BootstrapState,
        scheduler: &mut DualChainScheduler<'_, R>,
        grid: AlphaGrid,
    ) -> EngineResult<(EngineResult<f64>, BootstrapState)> {
        let block_size = self.config.pilot_block_size(scheduler.config().sub_steps);
        scheduler.reset();
        scheduler.set_alpha_grid(grid)?;
        scheduler.set_block_size(block_size)?;

        let adjust = scheduler.adjust_step_fraction();
        scheduler.set_step_fraction(0.5)?;
        scheduler.set_adjust_step_fraction(false);
        scheduler.set_max_steps(self.config.init_steps);
        let result = scheduler.run_to_completion(&SinkCallback {});
        scheduler.set_adjust_step_fraction(adjust);
        result?;

        let mut next = state.clone();
        next.pilot_steps += scheduler.step_count();

        let estimate = scheduler.coordinator()?.overlap_average();
        if let Ok(value) = estimate {
            if !value.is_finite() || value <= 0.0 {
                return Err(EngineError::ConvergenceFailure {
                    alpha: state.center,
                    value,
                    steps: next.pilot_steps,
                });
            }
        }
        Ok((estimate, next))
    }

    /// Handles a failed crossing search: crossings beyond the grid move the search to the grid's
    /// edge with a wider span, anything else is fatal.
    fn widen(&self, state: &BootstrapState, err: EngineError) -> EngineResult<BootstrapState> {
        let (side, alpha_min, alpha_max) = match err {
            EngineError::NoOverlap {
                side: side @ OverlapSide::BelowGrid,
                alpha_min,
                alpha_max,
                ..
            }
            | EngineError::NoOverlap {
                side: side @ OverlapSide::AboveGrid,
                alpha_min,
                alpha_max,
                ..
            } => (side, alpha_min, alpha_max),
            err => return Err(err),
        };

        let edge = if side == OverlapSide::BelowGrid {
            alpha_min
        } else {
            alpha_max
        };
        info!("crossing lies {}, re-centering at {}", side, edge);
        let log_span = state.log_span.max(self.config.wide_log_span) * self.config.widen_factor;
        self.retry(state, edge, log_span, side)
    }

    fn retry(
        &self,
        state: &BootstrapState,
        center: f64,
        log_span: f64,
        side: OverlapSide,
    ) -> EngineResult<BootstrapState> {
        if state.widen_attempts >= self.config.max_widen_attempts {
            let half = log_span.exp();
            return Err(EngineError::NoOverlap {
                side,
                alpha_min: center / half,
                alpha_max: center * half,
                steps: state.pilot_steps,
            });
        }
        let mut next = state.with_phase(BootstrapPhase::WideSearch, center, log_span);
        next.widen_attempts += 1;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Ensemble, EnsembleKind, SchedulerConfig, StepCost};
    use assert_approx_eq::assert_approx_eq;
    use rand_pcg::Pcg64;
    use tempfile::TempDir;

    /// Configurations whose weight ratio is the same everywhere: every reference configuration
    /// has `w_1 / w_0 = ratio`, so the optimal center equals `ratio`.
    struct ConstantChain {
        kind: EnsembleKind,
        ratio: f64,
    }

    impl Ensemble for ConstantChain {
        fn advance(&mut self, values: &mut [f64]) {
            values[0] = 1.0;
        }

        fn weight_ratio(&self) -> f64 {
            match self.kind {
                EnsembleKind::Reference => self.ratio,
                EnsembleKind::Target => 1.0 / self.ratio,
            }
        }
    }

    fn chains(ratio: f64) -> (ConstantChain, ConstantChain) {
        (
            ConstantChain {
                kind: EnsembleKind::Reference,
                ratio,
            },
            ConstantChain {
                kind: EnsembleKind::Target,
                ratio,
            },
        )
    }

    fn scheduler_config() -> SchedulerConfig {
        SchedulerConfig {
            alpha_count: 3,
            alpha_span: 2.0,
            block_size: 10,
            sub_steps: 10,
            max_steps: 500,
            step_cost: StepCost::Uniform,
            ..SchedulerConfig::default()
        }
    }

    fn bootstrap_config(dir: &TempDir) -> BootstrapConfig {
        BootstrapConfig {
            init_steps: 20,
            min_block_size: 10,
            center_file: Some(dir.path().join("center.txt")),
            ..BootstrapConfig::default()
        }
    }

    fn rng() -> Pcg64 {
        Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7ac28fa16a64abf96)
    }

    #[test]
    fn store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CenterStore::new(dir.path().join("center.txt"));
        assert_eq!(store.load(), None);

        store.save(0.125).unwrap();
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "0.125\n");
        assert_eq!(store.load(), Some(0.125));

        fs::write(store.path(), "not a number").unwrap();
        assert_eq!(store.load(), None);
        fs::write(store.path(), "-3").unwrap();
        assert_eq!(store.load(), None);

        let missing = CenterStore::new(dir.path().join("missing").join("center.txt"));
        assert!(matches!(
            missing.save(1.0),
            Err(EngineError::Persistence { .. })
        ));
    }

    #[test]
    fn converges_to_constant_ratio_and_persists() {
        let dir = TempDir::new().unwrap();
        let (mut reference, mut target) = chains(37.0);
        let mut scheduler =
            DualChainScheduler::new(&mut reference, &mut target, scheduler_config(), rng())
                .unwrap();
        let bootstrap = ReferenceParameterBootstrap::new(bootstrap_config(&dir)).unwrap();

        let state = bootstrap.run(&mut scheduler).unwrap();
        assert_eq!(state.phase(), BootstrapPhase::Converged);
        assert!(!state.from_file());
        assert_approx_eq!(state.center(), 37.0, 1e-8);
        assert_eq!(state.pilot_steps(), 60);

        let saved: f64 = fs::read_to_string(dir.path().join("center.txt"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_approx_eq!(saved, 37.0, 1e-8);

        // the scheduler is ready for production around the center
        assert_eq!(scheduler.grid().len(), 3);
        assert_approx_eq!(scheduler.grid().center(), 37.0, 1e-8);
        assert_eq!(scheduler.accumulator(EnsembleKind::Reference).block_size(), 10);
        assert_eq!(scheduler.max_steps(), 500);
        assert!(scheduler.adjust_step_fraction());
    }

    #[test]
    fn widens_when_crossing_lies_beyond_grid() {
        let dir = TempDir::new().unwrap();
        let ratio = 50.0f64.exp();
        let (mut reference, mut target) = chains(ratio);
        let mut scheduler =
            DualChainScheduler::new(&mut reference, &mut target, scheduler_config(), rng())
                .unwrap();
        let bootstrap = ReferenceParameterBootstrap::new(bootstrap_config(&dir)).unwrap();

        let state = bootstrap.run(&mut scheduler).unwrap();
        assert_eq!(state.widen_attempts(), 1);
        assert_approx_eq!(state.center().ln(), 50.0, 1e-8);
    }

    #[test]
    fn gives_up_after_bounded_attempts() {
        let dir = TempDir::new().unwrap();
        let (mut reference, mut target) = chains(1e-100);
        let mut scheduler =
            DualChainScheduler::new(&mut reference, &mut target, scheduler_config(), rng())
                .unwrap();
        let bootstrap = ReferenceParameterBootstrap::new(BootstrapConfig {
            max_widen_attempts: 1,
            ..bootstrap_config(&dir)
        })
        .unwrap();

        assert!(matches!(
            bootstrap.run(&mut scheduler),
            Err(EngineError::NoOverlap {
                side: OverlapSide::BelowGrid,
                ..
            })
        ));
        assert!(!dir.path().join("center.txt").exists());
    }

    #[test]
    fn center_from_file_skips_search() {
        let dir = TempDir::new().unwrap();
        let config = bootstrap_config(&dir);
        fs::write(dir.path().join("center.txt"), "3.5\n").unwrap();

        let (mut reference, mut target) = chains(37.0);
        let mut scheduler =
            DualChainScheduler::new(&mut reference, &mut target, scheduler_config(), rng())
                .unwrap();
        let bootstrap = ReferenceParameterBootstrap::new(config).unwrap();

        let state = bootstrap.advance(&bootstrap.initial_state(), &mut scheduler).unwrap();
        assert_eq!(state.phase(), BootstrapPhase::Converged);

        let state = bootstrap.run(&mut scheduler).unwrap();
        assert!(state.from_file());
        assert_eq!(state.pilot_steps(), 0);
        assert_approx_eq!(scheduler.grid().center(), 3.5, 1e-15);
        assert_eq!(scheduler.step_count(), 0);
    }

    #[test]
    fn crossing_at_grid_edge_reports_its_side() {
        let dir = TempDir::new().unwrap();
        let bootstrap = ReferenceParameterBootstrap::new(BootstrapConfig {
            max_widen_attempts: 0,
            ..bootstrap_config(&dir)
        })
        .unwrap();

        for &(log_ratio, expected) in &[
            (29.995, OverlapSide::AboveGrid),
            (-29.995, OverlapSide::BelowGrid),
        ] {
            let (mut reference, mut target) = chains(f64::exp(log_ratio));
            let mut scheduler =
                DualChainScheduler::new(&mut reference, &mut target, scheduler_config(), rng())
                    .unwrap();

            match bootstrap.run(&mut scheduler) {
                Err(EngineError::NoOverlap { side, .. }) => assert_eq!(side, expected),
                other => panic!("unexpected result {:?}", other.map(|s| s.center())),
            }
        }
        assert!(!dir.path().join("center.txt").exists());
    }
}
