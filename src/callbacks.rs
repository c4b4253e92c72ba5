//! Implementation of different callback functions.
use crate::core::EnsembleKind;
use crate::overlap::OverlapCoordinator;

/// State of a running scheduler handed to callbacks.
#[derive(Clone, Copy, Debug)]
pub struct Progress<'a> {
    /// Production super-steps taken so far.
    pub steps: u64,
    /// Production super-steps the run will take.
    pub max_steps: u64,
    /// Current fraction of super-steps spent in the reference chain.
    pub step_fraction: f64,
    /// Statistics of both chains.
    pub coordinator: OverlapCoordinator<'a>,
}

/// Trait for implementing callbacks for the scheduler
pub trait Callback {
    /// This method is called every `event_interval` production super-steps and may print
    /// information about the run.
    fn print(&self, progress: &Progress<'_>);
}

/// A callback function that does nothing
pub struct SinkCallback {}

impl Callback for SinkCallback {
    fn print(&self, _: &Progress<'_>) {}
}

/// A callback function that prints the current estimate
pub struct SimpleCallback {}

impl Callback for SimpleCallback {
    fn print(&self, progress: &Progress<'_>) {
        let coordinator = &progress.coordinator;
        let samples = |kind| coordinator.chain(kind).samples();

        println!(
            "step {}/{}: reference fraction {:.4} (N_ref={} N_target={})",
            progress.steps,
            progress.max_steps,
            progress.step_fraction,
            samples(EnsembleKind::Reference),
            samples(EnsembleKind::Target),
        );
        // estimates are unavailable until both chains overlap
        match coordinator.ratio_estimate() {
            Ok(estimate) => println!(
                "ratio: {} (alpha={})",
                estimate,
                coordinator.best_alpha().unwrap_or(f64::NAN)
            ),
            Err(err) => println!("ratio: unavailable ({})", err),
        }
    }
}
