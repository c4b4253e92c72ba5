//! Independent replicas of the whole engine on separate threads.
use crate::callbacks::SinkCallback;
use crate::core::{
    compute_steps_for_replica, AlphaGrid, ChainStatistics, EngineError, EngineResult, Ensemble,
    SchedulerConfig,
};
use crate::overlap::{DualChainScheduler, OverlapCoordinator};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crossbeam as cb;

/// Merged statistics of independent replicas.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ReplicaResult {
    grid: AlphaGrid,
    reference: ChainStatistics<f64>,
    target: ChainStatistics<f64>,
    steps: u64,
    replicas: usize,
}

impl ReplicaResult {
    /// The grid all replicas used.
    pub fn grid(&self) -> &AlphaGrid {
        &self.grid
    }

    /// Merged statistics of the reference chains.
    pub fn reference(&self) -> &ChainStatistics<f64> {
        &self.reference
    }

    /// Merged statistics of the target chains.
    pub fn target(&self) -> &ChainStatistics<f64> {
        &self.target
    }

    /// Production super-steps of all replicas combined.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Number of merged replicas.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// A view combining the merged statistics of both chains.
    pub fn coordinator(&self) -> EngineResult<OverlapCoordinator<'_>> {
        let coordinator = OverlapCoordinator::new(&self.grid, &self.reference, &self.target)?;
        Ok(coordinator.with_steps(self.steps))
    }

    /// Adds the statistics of `other`, which must have been taken with the same grid and shape.
    pub fn merge(&mut self, other: &Self) -> EngineResult<()> {
        if self.grid != other.grid {
            return Err(EngineError::InvalidConfiguration(
                "cannot merge replicas sampled with different alpha grids".to_string(),
            ));
        }
        self.reference.try_merge(&other.reference)?;
        self.target.try_merge(&other.target)?;
        self.steps += other.steps;
        self.replicas += other.replicas;
        Ok(())
    }
}

/// Perform the share of the super-steps of replica `replica`.
fn run_replica<F, A, B>(
    config: &SchedulerConfig,
    factory: &F,
    replica: usize,
    n_replicas: usize,
    seed: u128,
) -> EngineResult<ReplicaResult>
where
    F: Fn(usize) -> (A, B),
    A: Ensemble,
    B: Ensemble,
{
    let (mut reference, mut target) = factory(replica);
    // every replica draws from its own stream
    let rng = Pcg64::new(seed, replica as u128);

    let mut scheduler = DualChainScheduler::new(&mut reference, &mut target, config.clone(), rng)?;
    scheduler.set_max_steps(compute_steps_for_replica(
        replica,
        n_replicas,
        config.max_steps,
    ));
    scheduler.run_to_completion(&SinkCallback {})?;

    let steps = scheduler.step_count();
    let (grid, [reference, target]) = scheduler.into_statistics();
    Ok(ReplicaResult {
        grid,
        reference,
        target,
        steps,
        replicas: 1,
    })
}

/// Runs `n_replicas` independent copies of the engine on as many threads and merges their
/// statistics.
///
/// Each replica builds its own pair of chains with `factory`, which receives the replica index,
/// and draws its chain choices from PCG stream `replica` seeded with `seed`. The `max_steps` of
/// `config` are split evenly across the replicas. Step fractions adapt within each replica.
pub fn run_replicas<F, A, B>(
    config: &SchedulerConfig,
    n_replicas: usize,
    seed: u128,
    factory: F,
) -> EngineResult<ReplicaResult>
where
    F: Fn(usize) -> (A, B) + Sync,
    A: Ensemble,
    B: Ensemble,
{
    if n_replicas == 0 {
        return Err(EngineError::InvalidConfiguration(
            "at least one replica is needed".to_string(),
        ));
    }
    config.validate()?;

    let factory = &factory;
    let results = cb::thread::scope(|s| {
        let mut handles = Vec::with_capacity(n_replicas);

        for replica in 0..n_replicas {
            handles.push(s.spawn(move |_| run_replica(config, factory, replica, n_replicas, seed)));
        }

        // wait for the threads to finish, re-raising panics of the replicas
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect::<Vec<_>>()
    })
    .unwrap_or_else(|panic| std::panic::resume_unwind(panic));

    // accumulate the results of the replicas
    let mut merged: Option<ReplicaResult> = None;
    for result in results {
        let result = result?;
        merged = Some(match merged.take() {
            Some(mut accumulated) => {
                accumulated.merge(&result)?;
                accumulated
            }
            None => result,
        });
    }

    merged.ok_or_else(|| EngineError::InvalidConfiguration("no replica finished".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EnsembleKind, StepCost};
    use assert_approx_eq::assert_approx_eq;
    use rand::Rng;

    struct NoisyChain {
        rng: Pcg64,
        gamma: f64,
    }

    impl Ensemble for NoisyChain {
        fn advance(&mut self, values: &mut [f64]) {
            values[0] = self.rng.gen_range(0.5, 1.5);
        }

        fn weight_ratio(&self) -> f64 {
            self.gamma
        }
    }

    fn factory(replica: usize) -> (NoisyChain, NoisyChain) {
        let chain = |stream: u128, gamma: f64| NoisyChain {
            rng: Pcg64::new(0xcafef00dd15ea5e5, stream),
            gamma,
        };
        let stream = 2 * replica as u128;
        // constant weight ratio 2: the target integral is twice the reference integral
        (chain(stream, 2.0), chain(stream + 1, 0.5))
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            alpha_count: 5,
            alpha_center: 2.0,
            alpha_span: 3.0,
            block_size: 20,
            sub_steps: 20,
            max_steps: 403,
            step_cost: StepCost::Uniform,
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn replicas_merge_their_statistics() {
        let result =
            run_replicas(&config(), 4, 0xa02bdbf7bb3c0a7ac28fa16a64abf96, factory).unwrap();

        assert_eq!(result.replicas(), 4);
        assert_eq!(result.steps(), 403);
        assert_eq!(
            result.reference().samples() + result.target().samples(),
            403 * 20
        );

        let coordinator = result.coordinator().unwrap();
        assert_approx_eq!(coordinator.overlap_average().unwrap(), 2.0, 1e-10);
        let estimate = coordinator.ratio_estimate().unwrap();
        assert!((estimate.value() - 2.0).abs() < 4.0 * estimate.error());
        assert_eq!(coordinator.chain(EnsembleKind::Reference).width(), 7);
    }

    #[test]
    fn single_replica_matches_sequential_run() {
        let parallel = run_replicas(&config(), 1, 7, factory).unwrap();

        let (mut reference, mut target) = factory(0);
        let mut scheduler =
            DualChainScheduler::new(&mut reference, &mut target, config(), Pcg64::new(7, 0))
                .unwrap();
        scheduler.run_to_completion(&SinkCallback {}).unwrap();
        let (_, [reference, target]) = scheduler.into_statistics();

        assert_eq!(parallel.reference(), &reference);
        assert_eq!(parallel.target(), &target);
    }

    #[test]
    fn zero_replicas() {
        assert!(run_replicas(&config(), 0, 7, factory).is_err());
    }
}
