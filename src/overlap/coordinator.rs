//! Combination of the statistics of both chains into the final ratio.
use crate::core::{
    AlphaGrid, ChainStatistics, ComponentId, EngineError, EngineResult, EnsembleKind, FullResult,
    OverlapSide, RatioEstimate, VectorLayout,
};
use serde::{Deserialize, Serialize};

/// The ingredients of a ratio estimate at one bias parameter.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct OverlapResult {
    /// The bias parameter.
    pub alpha: f64,
    /// Reference value divided by the reference overlap average, $\langle v_0 \rangle_0 /
    /// \langle O \rangle_0$.
    pub reference: RatioEstimate,
    /// Target value divided by the target overlap average, $\langle v_1 \rangle_1 / \langle O
    /// \rangle_1$.
    pub target: RatioEstimate,
    /// The ratio of the two, the estimate of the target integral over the reference integral.
    pub ratio: RatioEstimate,
}

/// Reads the block statistics of both chains and evaluates the overlap estimates.
///
/// The coordinator is a view: it borrows the statistics and computes everything on demand.
#[derive(Clone, Copy, Debug)]
pub struct OverlapCoordinator<'a> {
    grid: &'a AlphaGrid,
    chains: [&'a ChainStatistics<f64>; 2],
    layouts: [VectorLayout; 2],
    steps: u64,
}

fn combine(numerator: RatioEstimate, denominator: RatioEstimate) -> RatioEstimate {
    let value = numerator.value() / denominator.value();
    let relative = numerator
        .relative_error()
        .hypot(denominator.relative_error());
    RatioEstimate::new(value, value.abs() * relative)
}

impl<'a> OverlapCoordinator<'a> {
    /// Creates a coordinator for the statistics of the `reference` and `target` chains, both
    /// accumulated with the bias parameters of `grid`.
    pub fn new(
        grid: &'a AlphaGrid,
        reference: &'a ChainStatistics<f64>,
        target: &'a ChainStatistics<f64>,
    ) -> EngineResult<Self> {
        Ok(Self {
            grid,
            chains: [reference, target],
            layouts: [
                VectorLayout::from_width(reference.width(), grid.len())?,
                VectorLayout::from_width(target.width(), grid.len())?,
            ],
            steps: 0,
        })
    }

    /// Records the number of super-steps behind the statistics, reported in errors.
    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = steps;
        self
    }

    /// The grid of bias parameters.
    pub fn grid(&self) -> &'a AlphaGrid {
        self.grid
    }

    /// The statistics of chain `kind`.
    pub fn chain(&self, kind: EnsembleKind) -> &'a ChainStatistics<f64> {
        self.chains[kind.index()]
    }

    /// The vector layout of chain `kind`.
    pub fn layout(&self, kind: EnsembleKind) -> VectorLayout {
        self.layouts[kind.index()]
    }

    fn index(&self, kind: EnsembleKind, id: ComponentId) -> EngineResult<usize> {
        self.layout(kind).index(id)
    }

    fn no_overlap(&self, side: OverlapSide) -> EngineError {
        EngineError::NoOverlap {
            side,
            alpha_min: self.grid.min(),
            alpha_max: self.grid.max(),
            steps: self.steps,
        }
    }

    /// Average and error of a component of one chain.
    pub fn average_and_error(
        &self,
        kind: EnsembleKind,
        id: ComponentId,
    ) -> EngineResult<RatioEstimate> {
        let i = self.index(kind, id)?;
        let chain = self.chain(kind);
        Ok(RatioEstimate::new(chain.average(i), chain.error(i)))
    }

    /// Ratio of two components of one chain with its error.
    fn chain_ratio(
        &self,
        kind: EnsembleKind,
        numerator: ComponentId,
        denominator: ComponentId,
    ) -> EngineResult<RatioEstimate> {
        let n = self.index(kind, numerator)?;
        let d = self.index(kind, denominator)?;
        let chain = self.chain(kind);
        Ok(RatioEstimate::new(chain.ratio(n, d), chain.ratio_error(n, d)?))
    }

    /// Interpolates `f` between the grid points bracketing `alpha`, linearly in $\ln \alpha$.
    fn interpolate<F>(&self, alpha: f64, f: F) -> EngineResult<RatioEstimate>
    where
        F: Fn(usize) -> EngineResult<RatioEstimate>,
    {
        let (j, fac) = self.grid.bracket(alpha)?;
        let lo = f(j)?;
        if fac == 0.0 {
            return Ok(lo);
        }
        let hi = f(j + 1)?;
        Ok(RatioEstimate::new(
            (1.0 - fac) * lo.value() + fac * hi.value(),
            (1.0 - fac) * lo.error() + fac * hi.error(),
        ))
    }

    /// Difference of the logarithm of the overlap estimate of the integral ratio at grid point `j`
    /// and $\ln \alpha_j$. It decreases with $\alpha$ and vanishes at the optimal bias parameter.
    fn crossing_difference(&self, j: usize) -> EngineResult<f64> {
        let o0 = self.average_and_error(EnsembleKind::Reference, ComponentId::Overlap(j))?;
        let o1 = self.average_and_error(EnsembleKind::Target, ComponentId::Overlap(j))?;
        Ok((o0.value() / o1.value()).ln() - self.grid.alpha(j).ln())
    }

    /// Returns the bias parameter for which the overlap estimate of the integral ratio equals the
    /// bias parameter itself, found by linear interpolation of the sign change between
    /// neighboring grid points. With a single grid point the overlap estimate itself is returned.
    ///
    /// Fails with [`EngineError::NoOverlap`] if the crossing lies outside of the grid or neither
    /// chain visited the overlap region.
    pub fn overlap_average(&self) -> EngineResult<f64> {
        let n = self.grid.len();

        if n == 1 {
            let estimate = self.overlap_average_and_error_for_alpha(self.grid.center())?;
            let value = estimate.value();
            if value.is_nan() {
                return Err(self.no_overlap(OverlapSide::Neither));
            }
            if !value.is_finite() || value == 0.0 {
                return Err(EngineError::ConvergenceFailure {
                    alpha: self.grid.center(),
                    value,
                    steps: self.steps,
                });
            }
            return Ok(value);
        }

        let d = (0..n)
            .map(|j| self.crossing_difference(j))
            .collect::<EngineResult<Vec<_>>>()?;

        if d.iter().any(|x| x.is_nan()) {
            return Err(self.no_overlap(OverlapSide::Neither));
        }
        if d[0] < 0.0 {
            return Err(self.no_overlap(OverlapSide::BelowGrid));
        }
        if d[n - 1] > 0.0 {
            return Err(self.no_overlap(OverlapSide::AboveGrid));
        }

        for j in 0..n - 1 {
            if d[j] >= 0.0 && d[j + 1] <= 0.0 {
                let lo = self.grid.alpha(j).ln();
                let hi = self.grid.alpha(j + 1).ln();
                let fac = if d[j] == d[j + 1] {
                    0.0
                } else {
                    d[j] / (d[j] - d[j + 1])
                };
                let alpha = (lo + fac * (hi - lo)).exp();
                return Ok(alpha.max(self.grid.min()).min(self.grid.max()));
            }
        }

        // unreachable for a real-valued sequence starting non-negative and ending non-positive
        Err(self.no_overlap(OverlapSide::Neither))
    }

    /// The overlap estimate of the integral ratio alone, $\langle O \rangle_0 / \langle O
    /// \rangle_1$, at `alpha`.
    pub fn overlap_average_and_error_for_alpha(&self, alpha: f64) -> EngineResult<RatioEstimate> {
        self.interpolate(alpha, |j| {
            let o0 = self.average_and_error(EnsembleKind::Reference, ComponentId::Overlap(j))?;
            let o1 = self.average_and_error(EnsembleKind::Target, ComponentId::Overlap(j))?;
            Ok(combine(o0, o1))
        })
    }

    /// Reference value over reference overlap average at `alpha`.
    pub fn reference_ratio_for_alpha(&self, alpha: f64) -> EngineResult<RatioEstimate> {
        self.interpolate(alpha, |j| {
            self.chain_ratio(
                EnsembleKind::Reference,
                ComponentId::Value,
                ComponentId::Overlap(j),
            )
        })
    }

    /// Target value `target` (zero for the primary value) over target overlap average at `alpha`.
    pub fn target_ratio_for_alpha(&self, alpha: f64, target: usize) -> EngineResult<RatioEstimate> {
        let id = target_id(target);
        self.interpolate(alpha, |j| {
            self.chain_ratio(EnsembleKind::Target, id, ComponentId::Overlap(j))
        })
    }

    /// Average of the reference overlap value at `alpha`.
    pub fn reference_overlap_for_alpha(&self, alpha: f64) -> EngineResult<RatioEstimate> {
        self.interpolate(alpha, |j| {
            self.average_and_error(EnsembleKind::Reference, ComponentId::Overlap(j))
        })
    }

    /// All ingredients of the estimate of target value `target` at `alpha`, without checking the
    /// result for convergence.
    pub fn full_overlap_result_for_alpha(
        &self,
        alpha: f64,
        target: usize,
    ) -> EngineResult<OverlapResult> {
        let reference = self.reference_ratio_for_alpha(alpha)?;
        let target = self.target_ratio_for_alpha(alpha, target)?;
        Ok(OverlapResult {
            alpha,
            reference,
            target,
            ratio: combine(target, reference),
        })
    }

    /// The ratio of target value `target` to the reference integral at the caller-supplied
    /// `alpha`. Zero, infinite or `NaN` ratios are reported as [`EngineError::ConvergenceFailure`].
    pub fn full_ratio_result_for_alpha(
        &self,
        alpha: f64,
        target: usize,
    ) -> EngineResult<RatioEstimate> {
        let ratio = self.full_overlap_result_for_alpha(alpha, target)?.ratio;
        let value = ratio.value();
        if !value.is_finite() || value == 0.0 {
            return Err(EngineError::ConvergenceFailure {
                alpha,
                value,
                steps: self.steps,
            });
        }
        Ok(ratio)
    }

    /// The ratio of target value `target` to the reference integral at the optimal bias parameter.
    pub fn average_and_error_for(&self, target: usize) -> EngineResult<RatioEstimate> {
        let alpha = self.best_alpha()?;
        self.full_ratio_result_for_alpha(alpha, target)
    }

    /// The ratio of the target integral to the reference integral at the optimal bias parameter.
    pub fn ratio_estimate(&self) -> EngineResult<RatioEstimate> {
        self.average_and_error_for(0)
    }

    /// The bias parameter at which estimates are evaluated: the crossing for a grid, the only
    /// point otherwise.
    pub fn best_alpha(&self) -> EngineResult<f64> {
        if self.grid.len() == 1 {
            // validates that the chains overlap at all
            self.overlap_average()?;
            return Ok(self.grid.center());
        }
        self.overlap_average()
    }

    /// Ratio of auxiliary target value `target` to the primary target value within the target
    /// chain, with the error including their covariance.
    pub fn target_ratio(&self, target: usize) -> EngineResult<RatioEstimate> {
        self.chain_ratio(EnsembleKind::Target, target_id(target), ComponentId::Value)
    }

    /// Raw averages and errors of the reference value and target value `target`.
    pub fn full_system_result(&self, target: usize) -> EngineResult<FullResult> {
        let reference = self.average_and_error(EnsembleKind::Reference, ComponentId::Value)?;
        let target = self.average_and_error(EnsembleKind::Target, target_id(target))?;
        Ok(FullResult {
            reference_average: reference.value(),
            reference_error: reference.error(),
            target_average: target.value(),
            target_error: target.error(),
        })
    }
}

fn target_id(target: usize) -> ComponentId {
    if target == 0 {
        ComponentId::Value
    } else {
        ComponentId::ExtraTarget(target - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::BlockRatioAccumulator;
    use crate::overlap::OverlapWeightTransform;
    use assert_approx_eq::assert_approx_eq;
    use rand::Rng;
    use rand_pcg::Pcg64;

    /// Feeds both chains with configurations of constant weight ratio: every reference
    /// configuration has `w_1 / w_0 = a`, so the integral ratio is `a` and so is the optimal
    /// bias parameter.
    fn constant_ratio_chains(
        grid: &AlphaGrid,
        a: f64,
        samples: usize,
    ) -> (ChainStatistics<f64>, ChainStatistics<f64>) {
        let mut rng = Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7ac28fa16a64abf96);
        let mut result = Vec::new();

        for &kind in &EnsembleKind::ALL {
            let mut transform = OverlapWeightTransform::new(kind, grid.clone(), 1);
            let width = transform.layout().width();
            let mut acc = BlockRatioAccumulator::with_full_covariance(width, 10).unwrap();
            let gamma = match kind {
                EnsembleKind::Reference => a,
                EnsembleKind::Target => 1.0 / a,
            };
            for _ in 0..samples {
                let value = 1.0 + 0.1 * (rng.gen::<f64>() - 0.5);
                transform.push(&[value], gamma, &mut acc);
            }
            result.push(acc.into_statistics());
        }

        let target = result.pop().unwrap();
        let reference = result.pop().unwrap();
        (reference, target)
    }

    #[test]
    fn crossing_recovers_constant_ratio() {
        let grid = AlphaGrid::new(1.0, 10.0, 11).unwrap();
        for &a in &[0.2, 1.0, 3.7] {
            let (reference, target) = constant_ratio_chains(&grid, a, 1000);
            let coordinator = OverlapCoordinator::new(&grid, &reference, &target).unwrap();

            assert_approx_eq!(coordinator.overlap_average().unwrap(), a, 1e-10 * a);

            let estimate = coordinator.ratio_estimate().unwrap();
            assert_approx_eq!(estimate.value(), a, 0.01 * a);
            assert!(estimate.error() < 0.01 * a);

            let overlap = coordinator.overlap_average_and_error_for_alpha(a).unwrap();
            assert_approx_eq!(overlap.value(), a, 1e-10 * a);
        }
    }

    #[test]
    fn crossing_outside_of_grid() {
        let grid = AlphaGrid::new(1.0, 2.0, 5).unwrap();

        let (reference, target) = constant_ratio_chains(&grid, 10.0, 100);
        let coordinator = OverlapCoordinator::new(&grid, &reference, &target)
            .unwrap()
            .with_steps(7);
        assert!(matches!(
            coordinator.overlap_average(),
            Err(EngineError::NoOverlap {
                side: OverlapSide::AboveGrid,
                steps: 7,
                ..
            })
        ));

        let (reference, target) = constant_ratio_chains(&grid, 0.1, 100);
        let coordinator = OverlapCoordinator::new(&grid, &reference, &target).unwrap();
        assert!(matches!(
            coordinator.overlap_average(),
            Err(EngineError::NoOverlap {
                side: OverlapSide::BelowGrid,
                ..
            })
        ));
    }

    #[test]
    fn chains_without_overlap() {
        let grid = AlphaGrid::new(1.0, 2.0, 5).unwrap();
        let mut chains = Vec::new();
        for &kind in &EnsembleKind::ALL {
            let mut transform = OverlapWeightTransform::new(kind, grid.clone(), 1);
            let mut acc = BlockRatioAccumulator::with_full_covariance(7, 10).unwrap();
            for _ in 0..100 {
                transform.push(&[1.0], 0.0, &mut acc);
            }
            chains.push(acc.into_statistics());
        }
        let coordinator = OverlapCoordinator::new(&grid, &chains[0], &chains[1]).unwrap();

        assert!(matches!(
            coordinator.overlap_average(),
            Err(EngineError::NoOverlap {
                side: OverlapSide::Neither,
                ..
            })
        ));
        assert!(matches!(
            coordinator.full_ratio_result_for_alpha(1.0, 0),
            Err(EngineError::ConvergenceFailure { .. })
        ));
    }

    #[test]
    fn single_alpha() {
        let grid = AlphaGrid::single(2.0);
        let (reference, target) = constant_ratio_chains(&grid, 0.5, 200);
        let coordinator = OverlapCoordinator::new(&grid, &reference, &target).unwrap();

        assert_approx_eq!(coordinator.overlap_average().unwrap(), 0.5, 1e-12);
        assert_approx_eq!(coordinator.best_alpha().unwrap(), 2.0, 1e-15);
        assert_approx_eq!(coordinator.ratio_estimate().unwrap().value(), 0.5, 0.01);
    }

    #[test]
    fn pinned_alpha_must_lie_on_grid() {
        let grid = AlphaGrid::new(1.0, 2.0, 5).unwrap();
        let (reference, target) = constant_ratio_chains(&grid, 1.0, 100);
        let coordinator = OverlapCoordinator::new(&grid, &reference, &target).unwrap();

        assert!(matches!(
            coordinator.full_ratio_result_for_alpha(4.0, 0),
            Err(EngineError::AlphaOutOfRange { .. })
        ));
        let result = coordinator.full_overlap_result_for_alpha(1.5, 0).unwrap();
        assert_approx_eq!(result.ratio.value(), 1.0, 0.01);
        assert_approx_eq!(result.alpha, 1.5, 1e-15);
    }

    #[test]
    fn raw_averages() {
        let grid = AlphaGrid::new(1.0, 2.0, 3).unwrap();
        let (reference, target) = constant_ratio_chains(&grid, 1.0, 1000);
        let coordinator = OverlapCoordinator::new(&grid, &reference, &target).unwrap();
        let full = coordinator.full_system_result(0).unwrap();

        assert_approx_eq!(full.reference_average, 1.0, 0.01);
        assert_approx_eq!(full.target_average, 1.0, 0.01);
        assert!(full.reference_error > 0.0 && full.reference_error < 0.01);

        assert!(matches!(
            coordinator.full_system_result(1),
            Err(EngineError::ComponentOutOfRange { .. })
        ));
    }
}
