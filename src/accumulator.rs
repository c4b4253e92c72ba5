//! Block averaging of fixed-width vectors.
use crate::core::error::{EngineError, EngineResult};
use crate::core::estimators::ChainStatistics;
use num_traits::{Float, FromPrimitive};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Reduces a stream of fixed-width vectors into block means and keeps the running sums needed
/// for averages, errors, block correlations, ratios and covariances.
///
/// The block size is fixed for the lifetime of the accumulated data: changing it requires an
/// explicit [`reset`](BlockRatioAccumulator::reset) first.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BlockRatioAccumulator<T> {
    statistics: ChainStatistics<T>,
    block_sum: Vec<T>,
    block_sumsq: Vec<T>,
    block_count: usize,
    previous: Option<Vec<T>>,
    mean: Vec<T>,
}

impl<T> BlockRatioAccumulator<T>
where
    T: AddAssign + Float + FromPrimitive,
{
    /// Creates an accumulator for vectors with `width` components and blocks of `block_size`
    /// vectors, tracking the covariance of the given `pairs` of components. Pairs referring to
    /// components beyond `width` are rejected.
    pub fn new(width: usize, block_size: usize, pairs: &[(usize, usize)]) -> EngineResult<Self> {
        Self::check_block_size(block_size)?;
        Ok(Self::from_statistics(ChainStatistics::new(
            width, block_size, pairs,
        )?))
    }

    /// Creates an accumulator that tracks the covariance of every pair of components.
    pub fn with_full_covariance(width: usize, block_size: usize) -> EngineResult<Self> {
        Self::check_block_size(block_size)?;
        Ok(Self::from_statistics(
            ChainStatistics::with_full_covariance(width, block_size),
        ))
    }

    fn from_statistics(statistics: ChainStatistics<T>) -> Self {
        let width = statistics.width();
        Self {
            statistics,
            block_sum: vec![T::zero(); width],
            block_sumsq: vec![T::zero(); width],
            block_count: 0,
            previous: None,
            mean: vec![T::zero(); width],
        }
    }

    fn check_block_size(block_size: usize) -> EngineResult<()> {
        if block_size == 0 {
            return Err(EngineError::InvalidConfiguration(
                "block size must be at least one".to_string(),
            ));
        }
        Ok(())
    }

    /// Adds one vector to the current block. When the block is full its mean is folded into the
    /// running sums. Non-finite components are replaced by zero and counted.
    ///
    /// # Panics
    ///
    /// Panics if `data` does not have exactly [`width`](BlockRatioAccumulator::width) components.
    pub fn add_data(&mut self, data: &[T]) {
        assert_eq!(
            data.len(),
            self.block_sum.len(),
            "vector of {} components added to an accumulator of width {}",
            data.len(),
            self.block_sum.len()
        );

        let mut non_finite = false;
        for (i, &value) in data.iter().enumerate() {
            let value = if value.is_finite() {
                value
            } else {
                non_finite = true;
                T::zero()
            };
            self.block_sum[i] += value;
            self.block_sumsq[i] += value * value;
        }
        if non_finite {
            self.statistics.count_non_finite();
        }

        self.block_count += 1;

        if self.block_count == self.statistics.block_size() {
            let n = T::from_usize(self.block_count).unwrap_or_else(T::nan);
            for (m, &s) in self.mean.iter_mut().zip(&self.block_sum) {
                *m = s / n;
            }
            self.statistics
                .fold_block(&self.mean, self.previous.as_deref(), &self.block_sumsq);

            match &mut self.previous {
                Some(previous) => previous.copy_from_slice(&self.mean),
                None => self.previous = Some(self.mean.clone()),
            }
            self.block_sum.iter_mut().for_each(|s| *s = T::zero());
            self.block_sumsq.iter_mut().for_each(|s| *s = T::zero());
            self.block_count = 0;
        }
    }

    /// Returns the number of components.
    pub fn width(&self) -> usize {
        self.statistics.width()
    }

    /// Returns the number of vectors per block.
    pub fn block_size(&self) -> usize {
        self.statistics.block_size()
    }

    /// Returns the number of completed blocks.
    pub fn block_count(&self) -> usize {
        self.statistics.blocks()
    }

    /// Returns the number of vectors added since the last reset.
    pub fn sample_count(&self) -> usize {
        self.statistics.samples() + self.block_count
    }

    /// Returns whether no data has been added since the last reset.
    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0 && self.statistics.non_finite_samples() == 0
    }

    /// Returns the statistics of the completed blocks.
    pub fn statistics(&self) -> &ChainStatistics<T> {
        &self.statistics
    }

    /// Consumes the accumulator, dropping the incomplete block.
    pub fn into_statistics(self) -> ChainStatistics<T> {
        self.statistics
    }

    /// Returns the average of component `i` over every vector added, including those of the
    /// incomplete block.
    pub fn average(&self, i: usize) -> T {
        let n = self.sample_count();
        if n == 0 {
            return T::nan();
        }
        let block_size = T::from_usize(self.block_size()).unwrap_or_else(T::nan);
        let blocks = T::from_usize(self.block_count()).unwrap_or_else(T::nan);
        let total = if self.block_count() == 0 {
            self.block_sum[i]
        } else {
            self.statistics.average(i) * blocks * block_size + self.block_sum[i]
        };
        total / T::from_usize(n).unwrap_or_else(T::nan)
    }

    /// Returns the standard deviation of the individual vectors' component `i`.
    pub fn standard_deviation(&self, i: usize) -> T {
        self.statistics.standard_deviation(i)
    }

    /// Returns the standard error of the average of component `i`, `NaN` with fewer than two
    /// completed blocks.
    pub fn error(&self, i: usize) -> T {
        self.statistics.error(i)
    }

    /// Returns the correlation between consecutive block means of component `i`.
    pub fn block_correlation(&self, i: usize) -> T {
        self.statistics.block_correlation(i)
    }

    /// Returns the ratio of the averages of two components.
    pub fn ratio(&self, numerator: usize, denominator: usize) -> T {
        self.average(numerator) / self.average(denominator)
    }

    /// Returns the first-order uncertainty of `ratio(numerator, denominator)`.
    pub fn ratio_error(&self, numerator: usize, denominator: usize) -> EngineResult<T> {
        self.statistics.ratio_error(numerator, denominator)
    }

    /// Returns the covariance of the block means of two components.
    pub fn covariance(&self, i: usize, j: usize) -> EngineResult<T> {
        self.statistics.covariance(i, j)
    }

    /// Returns the covariance matrix of the block means.
    pub fn covariance_matrix(&self) -> EngineResult<Vec<Vec<T>>> {
        self.statistics.covariance_matrix()
    }

    /// Changes the block size. Fails if the accumulator holds data, since block statistics of
    /// different widths cannot be combined.
    pub fn set_block_size(&mut self, block_size: usize) -> EngineResult<()> {
        Self::check_block_size(block_size)?;
        if block_size == self.block_size() {
            return Ok(());
        }
        if !self.is_empty() {
            return Err(EngineError::AccumulatorNotEmpty);
        }
        let pairs = self.statistics.tracked_pairs().to_vec();
        *self = Self::from_statistics(ChainStatistics::new(self.width(), block_size, &pairs)?);
        Ok(())
    }

    /// Whether the incomplete block matches the shape of the statistics, which may not hold for
    /// deserialized accumulators.
    pub(crate) fn is_consistent(&self) -> bool {
        let width = self.width();
        self.block_size() > 0
            && self.block_count < self.block_size()
            && self.block_sum.len() == width
            && self.block_sumsq.len() == width
            && self.mean.len() == width
            && self.previous.as_ref().map_or(true, |p| p.len() == width)
    }

    /// Discards all data.
    pub fn reset(&mut self) {
        let statistics = self.statistics.empty_copy();
        *self = Self::from_statistics(statistics);
    }
}
