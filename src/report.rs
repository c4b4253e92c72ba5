//! Summaries of a run for a caller-owned logging or printing layer.
use crate::core::{ChainStatistics, EngineResult, EnsembleKind, RatioEstimate};
use crate::overlap::OverlapCoordinator;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-component statistics of one chain.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChainReport {
    /// The chain.
    pub kind: EnsembleKind,
    /// Samples in completed blocks.
    pub samples: usize,
    /// Completed blocks.
    pub blocks: usize,
    /// Samples with non-finite components.
    pub non_finite_samples: usize,
    /// Averages.
    pub average: Vec<f64>,
    /// Standard deviations of the individual samples.
    pub standard_deviation: Vec<f64>,
    /// Standard errors of the averages.
    pub error: Vec<f64>,
    /// Correlations of consecutive block means.
    pub block_correlation: Vec<f64>,
    /// Covariance matrix of the block means, present if every pair is tracked.
    pub covariance: Option<Vec<Vec<f64>>>,
}

impl ChainReport {
    /// Summarizes `statistics` of chain `kind`.
    pub fn new(kind: EnsembleKind, statistics: &ChainStatistics<f64>) -> Self {
        let width = statistics.width();
        let collect = |f: &dyn Fn(usize) -> f64| (0..width).map(f).collect::<Vec<_>>();

        Self {
            kind,
            samples: statistics.samples(),
            blocks: statistics.blocks(),
            non_finite_samples: statistics.non_finite_samples(),
            average: collect(&|i| statistics.average(i)),
            standard_deviation: collect(&|i| statistics.standard_deviation(i)),
            error: collect(&|i| statistics.error(i)),
            block_correlation: collect(&|i| statistics.block_correlation(i)),
            covariance: statistics.covariance_matrix().ok(),
        }
    }
}

/// The estimate of a run together with the statistics of both chains.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Report {
    /// Production super-steps.
    pub steps: u64,
    /// Fraction of super-steps spent in the reference chain, if known.
    pub step_fraction: Option<f64>,
    /// The bias parameter of the estimate.
    pub alpha: Option<f64>,
    /// Ratio of the target integral to the reference integral.
    pub estimate: Option<RatioEstimate>,
    /// Why no estimate is available.
    pub failure: Option<String>,
    /// Statistics of the reference and the target chain.
    pub chains: [ChainReport; 2],
}

impl Report {
    /// Summarizes the state seen by `coordinator` after `steps` super-steps.
    pub fn new(
        coordinator: &OverlapCoordinator<'_>,
        steps: u64,
        step_fraction: Option<f64>,
    ) -> Self {
        let result = coordinator
            .best_alpha()
            .and_then(|alpha| Ok((alpha, coordinator.full_ratio_result_for_alpha(alpha, 0)?)));
        let (alpha, estimate, failure) = match result {
            Ok((alpha, estimate)) => (Some(alpha), Some(estimate), None),
            Err(err) => (None, None, Some(err.to_string())),
        };

        Self {
            steps,
            step_fraction,
            alpha,
            estimate,
            failure,
            chains: [
                ChainReport::new(
                    EnsembleKind::Reference,
                    coordinator.chain(EnsembleKind::Reference),
                ),
                ChainReport::new(EnsembleKind::Target, coordinator.chain(EnsembleKind::Target)),
            ],
        }
    }

    /// Serializes the report to JSON. Statistics without data are written as `null`.
    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.estimate, self.alpha) {
            (Some(estimate), Some(alpha)) => {
                writeln!(f, "ratio: {} (alpha={}, steps={})", estimate, alpha, self.steps)?
            }
            _ => writeln!(
                f,
                "ratio: unavailable after {} steps ({})",
                self.steps,
                self.failure.as_deref().unwrap_or("unknown")
            )?,
        }
        if let Some(fraction) = self.step_fraction {
            writeln!(f, "reference step fraction: {}", fraction)?;
        }
        for chain in &self.chains {
            writeln!(
                f,
                "{} chain: {} samples in {} blocks",
                chain.kind, chain.samples, chain.blocks
            )?;
            for i in 0..chain.average.len() {
                writeln!(
                    f,
                    "  [{}] average {} stdev {} error {} block correlation {}",
                    i,
                    chain.average[i],
                    chain.standard_deviation[i],
                    chain.error[i],
                    chain.block_correlation[i]
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::BlockRatioAccumulator;
    use crate::core::AlphaGrid;
    use crate::overlap::OverlapWeightTransform;

    fn statistics(grid: &AlphaGrid, kind: EnsembleKind, gamma: f64) -> ChainStatistics<f64> {
        let mut transform = OverlapWeightTransform::new(kind, grid.clone(), 1);
        let mut acc =
            BlockRatioAccumulator::with_full_covariance(transform.layout().width(), 5).unwrap();
        for k in 0..50 {
            transform.push(&[1.0 + 0.01 * (k % 7) as f64], gamma, &mut acc);
        }
        acc.into_statistics()
    }

    #[test]
    fn report_with_estimate() {
        let grid = AlphaGrid::new(1.0, 2.0, 3).unwrap();
        let reference = statistics(&grid, EnsembleKind::Reference, 1.0);
        let target = statistics(&grid, EnsembleKind::Target, 1.0);
        let coordinator = OverlapCoordinator::new(&grid, &reference, &target).unwrap();
        let report = Report::new(&coordinator, 12, Some(0.5));

        assert!(report.failure.is_none());
        assert_eq!(report.chains[0].average.len(), 5);
        assert_eq!(report.chains[1].blocks, 10);
        assert!(report.chains[0].covariance.is_some());

        let json = report.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["steps"], 12);
        assert!(report.to_string().starts_with("ratio: "));
    }

    #[test]
    fn report_without_overlap() {
        let grid = AlphaGrid::new(1.0, 2.0, 3).unwrap();
        let reference = statistics(&grid, EnsembleKind::Reference, 0.0);
        let target = statistics(&grid, EnsembleKind::Target, 0.0);
        let coordinator = OverlapCoordinator::new(&grid, &reference, &target).unwrap();
        let report = Report::new(&coordinator, 3, None);

        assert!(report.estimate.is_none());
        assert!(report.failure.as_deref().unwrap_or("").contains("no overlap"));
        assert!(report.to_string().contains("unavailable"));
    }
}
