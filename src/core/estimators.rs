//! This module contains everything related to estimators.
use crate::core::error::{EngineError, EngineResult};
use num_traits::{Float, FromPrimitive};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Largest block-to-block correlation used when inflating errors; larger values are clamped.
pub const MAX_BLOCK_CORRELATION: f64 = 0.99;

/// Basic estimators, like the mean, variance, and the standard deviation.
pub trait BasicEstimators<T: Float> {
    /// Returns the mean value.
    fn mean(&self) -> T;

    /// Returns the variance, $V$.
    fn var(&self) -> T;

    /// Returns the standard deviation, $\sigma = \sqrt{V}$.
    fn std(&self) -> T {
        self.var().sqrt()
    }
}

fn cast<T: Float + FromPrimitive>(n: usize) -> T {
    T::from_usize(n).unwrap_or_else(T::nan)
}

/// Running sums over completed blocks of fixed-width vectors.
///
/// From these sums the mean, the block variance, the standard error, the lag-1 block correlation
/// and the covariances of a set of tracked component pairs follow without retaining the blocks
/// themselves. All sums are additive, two instances with the same shape can be merged with `+`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChainStatistics<T> {
    width: usize,
    block_size: usize,
    blocks: usize,
    /// Sum of the block means.
    sum: Vec<T>,
    /// Sum of the squared block means.
    sumsq: Vec<T>,
    /// Sum of the squares of the individual samples of all completed blocks.
    raw_sumsq: Vec<T>,
    /// Tracked off-diagonal pairs `(i, j)` with `i < j`.
    pairs: Vec<(usize, usize)>,
    /// Sum of the products of block means for each tracked pair.
    cross: Vec<T>,
    /// Sum of `b_k * b_{k-1}` over consecutive blocks.
    lag_product: Vec<T>,
    /// Sum of `b_k + b_{k-1}` over consecutive blocks.
    lag_sum: Vec<T>,
    lag_pairs: usize,
    non_finite: usize,
}

impl<T> ChainStatistics<T>
where
    T: AddAssign + Float + FromPrimitive,
{
    /// Creates empty statistics for vectors of `width` components, reduced in blocks of
    /// `block_size` samples. The covariance of every pair in `pairs` is tracked in addition to
    /// the variances. Fails if a pair refers to a component beyond `width`.
    pub fn new(width: usize, block_size: usize, pairs: &[(usize, usize)]) -> EngineResult<Self> {
        let mut normalized: Vec<(usize, usize)> = pairs
            .iter()
            .filter(|&&(i, j)| i != j)
            .map(|&(i, j)| if i < j { (i, j) } else { (j, i) })
            .collect();
        normalized.sort_unstable();
        normalized.dedup();

        if let Some(&(_, index)) = normalized.iter().find(|&&(_, j)| j >= width) {
            return Err(EngineError::ComponentOutOfRange { index, width });
        }

        Ok(Self::with_pairs(width, block_size, normalized))
    }

    /// Creates empty statistics that track the covariance of every pair of components.
    pub fn with_full_covariance(width: usize, block_size: usize) -> Self {
        let pairs = (0..width)
            .flat_map(|i| (i + 1..width).map(move |j| (i, j)))
            .collect::<Vec<_>>();
        Self::with_pairs(width, block_size, pairs)
    }

    /// `pairs` must be sorted, unique, in range and have `i < j`.
    fn with_pairs(width: usize, block_size: usize, pairs: Vec<(usize, usize)>) -> Self {
        Self {
            width,
            block_size,
            blocks: 0,
            sum: vec![T::zero(); width],
            sumsq: vec![T::zero(); width],
            raw_sumsq: vec![T::zero(); width],
            cross: vec![T::zero(); pairs.len()],
            pairs,
            lag_product: vec![T::zero(); width],
            lag_sum: vec![T::zero(); width],
            lag_pairs: 0,
            non_finite: 0,
        }
    }

    /// Same shape, no data.
    pub fn empty_copy(&self) -> Self {
        Self {
            blocks: 0,
            sum: vec![T::zero(); self.width],
            sumsq: vec![T::zero(); self.width],
            raw_sumsq: vec![T::zero(); self.width],
            cross: vec![T::zero(); self.pairs.len()],
            lag_product: vec![T::zero(); self.width],
            lag_sum: vec![T::zero(); self.width],
            lag_pairs: 0,
            non_finite: 0,
            pairs: self.pairs.clone(),
            ..*self
        }
    }

    /// Folds a completed block into the sums. `previous` is the mean of the block completed just
    /// before it, if any, and `raw_sumsq` the sum of the squares of its individual samples.
    pub(crate) fn fold_block(&mut self, mean: &[T], previous: Option<&[T]>, raw_sumsq: &[T]) {
        debug_assert_eq!(mean.len(), self.width);

        for i in 0..self.width {
            self.sum[i] += mean[i];
            self.sumsq[i] += mean[i] * mean[i];
            self.raw_sumsq[i] += raw_sumsq[i];
        }

        for (k, &(i, j)) in self.pairs.iter().enumerate() {
            self.cross[k] += mean[i] * mean[j];
        }

        if let Some(previous) = previous {
            for i in 0..self.width {
                self.lag_product[i] += mean[i] * previous[i];
                self.lag_sum[i] += mean[i] + previous[i];
            }
            self.lag_pairs += 1;
        }

        self.blocks += 1;
    }

    pub(crate) fn count_non_finite(&mut self) {
        self.non_finite += 1;
    }

    /// Returns the number of components.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the number of samples per block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the number of completed blocks.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Returns the number of samples in completed blocks.
    pub fn samples(&self) -> usize {
        self.blocks * self.block_size
    }

    /// Returns how many incoming vectors contained a non-finite component, which was replaced by
    /// zero.
    pub fn non_finite_samples(&self) -> usize {
        self.non_finite
    }

    /// Returns the tracked off-diagonal pairs.
    pub fn tracked_pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    /// Returns the mean of component `i`, `NaN` without data.
    pub fn average(&self, i: usize) -> T {
        if self.blocks == 0 {
            return T::nan();
        }
        self.sum[i] / cast(self.blocks)
    }

    /// Returns the variance of the block means of component `i`.
    pub fn block_variance(&self, i: usize) -> T {
        if self.blocks == 0 {
            return T::nan();
        }
        let avg = self.average(i);
        let var = self.sumsq[i] / cast(self.blocks) - avg * avg;
        var.max(T::zero())
    }

    /// Returns the standard deviation of the individual samples of component `i`.
    pub fn standard_deviation(&self, i: usize) -> T {
        if self.blocks == 0 {
            return T::nan();
        }
        let avg = self.average(i);
        let var = self.raw_sumsq[i] / cast(self.samples()) - avg * avg;
        var.max(T::zero()).sqrt()
    }

    /// Returns the correlation between consecutive block means of component `i`. Values near zero
    /// mean the blocks are long enough to be independent.
    pub fn block_correlation(&self, i: usize) -> T {
        if self.blocks < 2 || self.lag_pairs == 0 {
            return T::nan();
        }
        let var = self.block_variance(i);
        if var <= T::zero() {
            return T::nan();
        }
        let avg = self.average(i);
        let pairs = cast(self.lag_pairs);
        let lag = (self.lag_product[i] - avg * self.lag_sum[i]) / pairs + avg * avg;
        lag / var
    }

    /// Factor by which the naive standard error is inflated when consecutive blocks are
    /// positively correlated.
    pub fn correlation_correction(&self, i: usize) -> T {
        let corr = self.block_correlation(i);
        if corr.is_nan() || corr <= T::zero() {
            return T::one();
        }
        let max = T::from_f64(MAX_BLOCK_CORRELATION).unwrap_or_else(T::one);
        let corr = corr.min(max);
        ((T::one() + corr) / (T::one() - corr)).sqrt()
    }

    /// Returns the standard error of the mean of component `i`, `NaN` with fewer than two blocks.
    pub fn error(&self, i: usize) -> T {
        if self.blocks < 2 {
            return T::nan();
        }
        let naive = (self.block_variance(i) / cast(self.blocks - 1)).sqrt();
        naive * self.correlation_correction(i)
    }

    fn pair_index(&self, i: usize, j: usize) -> Option<usize> {
        let key = if i < j { (i, j) } else { (j, i) };
        self.pairs.binary_search(&key).ok()
    }

    /// Returns whether the covariance between `i` and `j` is available.
    pub fn is_tracked(&self, i: usize, j: usize) -> bool {
        i == j || self.pair_index(i, j).is_some()
    }

    /// Returns the covariance of the block means of components `i` and `j`.
    pub fn covariance(&self, i: usize, j: usize) -> EngineResult<T> {
        for &index in &[i, j] {
            if index >= self.width {
                return Err(EngineError::ComponentOutOfRange {
                    index,
                    width: self.width,
                });
            }
        }
        if i == j {
            return Ok(self.block_variance(i));
        }
        let k = self
            .pair_index(i, j)
            .ok_or(EngineError::UntrackedPair { first: i, second: j })?;
        if self.blocks == 0 {
            return Ok(T::nan());
        }
        Ok(self.cross[k] / cast(self.blocks) - self.average(i) * self.average(j))
    }

    /// Returns the covariance matrix of the block means. Fails unless every pair is tracked.
    pub fn covariance_matrix(&self) -> EngineResult<Vec<Vec<T>>> {
        (0..self.width)
            .map(|i| (0..self.width).map(|j| self.covariance(i, j)).collect())
            .collect()
    }

    /// Returns the ratio of the averages of components `numerator` and `denominator`.
    pub fn ratio(&self, numerator: usize, denominator: usize) -> T {
        self.average(numerator) / self.average(denominator)
    }

    /// Returns the uncertainty of `ratio(numerator, denominator)`, propagated to first order
    /// including the covariance of both averages:
    ///
    /// $$ \sigma_r^2 = \frac{\sigma_n^2 - 2 r \, \mathrm{cov}(n, d) + r^2 \sigma_d^2}{\bar{d}^2} $$
    ///
    /// Evaluates to `NaN` with fewer than two blocks.
    pub fn ratio_error(&self, numerator: usize, denominator: usize) -> EngineResult<T> {
        let block_cov = self.covariance(numerator, denominator)?;
        if self.blocks < 2 {
            return Ok(T::nan());
        }

        let ratio = self.ratio(numerator, denominator);
        let err_n = self.error(numerator);
        let err_d = self.error(denominator);
        let cov = block_cov / cast(self.blocks - 1)
            * self.correlation_correction(numerator)
            * self.correlation_correction(denominator);
        let avg_d = self.average(denominator);

        let two = T::one() + T::one();
        let var = (err_n * err_n - two * ratio * cov + ratio * ratio * err_d * err_d)
            / (avg_d * avg_d);

        Ok(var.max(T::zero()).sqrt())
    }

    /// Adds the sums of `other`, failing if the two were accumulated with different shapes.
    pub fn try_merge(&mut self, other: &Self) -> EngineResult<()> {
        if self.width != other.width
            || self.block_size != other.block_size
            || self.pairs != other.pairs
        {
            return Err(EngineError::InvalidConfiguration(format!(
                "cannot merge statistics of shape {}x{} with shape {}x{}",
                self.width, self.block_size, other.width, other.block_size
            )));
        }

        let add = |lhs: &mut Vec<T>, rhs: &Vec<T>| {
            lhs.iter_mut().zip(rhs).for_each(|(a, &b)| *a += b);
        };
        add(&mut self.sum, &other.sum);
        add(&mut self.sumsq, &other.sumsq);
        add(&mut self.raw_sumsq, &other.raw_sumsq);
        add(&mut self.cross, &other.cross);
        add(&mut self.lag_product, &other.lag_product);
        add(&mut self.lag_sum, &other.lag_sum);
        self.blocks += other.blocks;
        self.lag_pairs += other.lag_pairs;
        self.non_finite += other.non_finite;

        Ok(())
    }
}

impl<T> AddAssign for ChainStatistics<T>
where
    T: AddAssign + Float + FromPrimitive,
{
    fn add_assign(&mut self, other: Self) {
        if let Err(err) = self.try_merge(&other) {
            panic!("{}", err);
        }
    }
}

impl<T> Add for ChainStatistics<T>
where
    T: AddAssign + Float + FromPrimitive,
{
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}
