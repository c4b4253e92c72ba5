//! Reweighting of raw samples with the overlap functions of every grid point.
use crate::accumulator::BlockRatioAccumulator;
use crate::core::{AlphaGrid, EnsembleKind, VectorLayout};

/// The Fermi function $1 / (1 + \alpha x)$, with $x = \infty$ mapped to zero.
pub fn fermi(alpha: f64, x: f64) -> f64 {
    if x.is_infinite() {
        0.0
    } else {
        1.0 / (1.0 + alpha * x)
    }
}

/// Turns one raw sample of a chain into its biased vector.
///
/// Both chains are reweighted in terms of $x = w_0 / w_1$, the ratio of the reference weight to
/// the target weight. Inside the reference chain the overlap value for $\alpha$ is $1 / (1 +
/// \alpha x)$, inside the target chain it is $x / (1 + \alpha x)$. Both are estimates of the same
/// integral over the overlap distribution $w_0 w_1 / (w_1 + \alpha w_0)$ divided by the
/// respective chain's normalization, so that
///
/// $$
/// \frac{Q_1}{Q_0} = \frac{\langle 1/(1+\alpha x) \rangle_0}
///                       {\langle x/(1+\alpha x) \rangle_1}
/// $$
///
/// holds for every $\alpha$. The vector starts with the raw values, followed by one overlap value
/// per grid point and the occupancy $1/(1 + c x)$ at the grid center $c$.
#[derive(Clone, Debug)]
pub struct OverlapWeightTransform {
    kind: EnsembleKind,
    grid: AlphaGrid,
    layout: VectorLayout,
    buffer: Vec<f64>,
}

impl OverlapWeightTransform {
    /// Creates the transform for chain `kind` with `values` raw values per sample.
    pub fn new(kind: EnsembleKind, grid: AlphaGrid, values: usize) -> Self {
        let layout = VectorLayout::new(values, grid.len());
        Self {
            kind,
            grid,
            layout,
            buffer: vec![0.0; layout.width()],
        }
    }

    /// The chain this transform belongs to.
    pub fn kind(&self) -> EnsembleKind {
        self.kind
    }

    /// The grid of bias parameters.
    pub fn grid(&self) -> &AlphaGrid {
        &self.grid
    }

    /// Layout of the produced vectors.
    pub fn layout(&self) -> VectorLayout {
        self.layout
    }

    /// Converts the chain's weight ratio $\gamma = w_\mathrm{other}/w_\mathrm{this}$ into $x =
    /// w_0 / w_1$.
    fn reference_over_target(&self, gamma: f64) -> f64 {
        match self.kind {
            EnsembleKind::Reference if gamma == 0.0 => f64::INFINITY,
            EnsembleKind::Reference => 1.0 / gamma,
            EnsembleKind::Target => gamma,
        }
    }

    /// The overlap value for bias parameter `alpha` of a configuration with weight ratio `gamma`.
    pub fn overlap_value(&self, alpha: f64, gamma: f64) -> f64 {
        let x = self.reference_over_target(gamma);
        match self.kind {
            EnsembleKind::Reference => fermi(alpha, x),
            EnsembleKind::Target if x.is_infinite() => 1.0 / alpha,
            EnsembleKind::Target => x * fermi(alpha, x),
        }
    }

    /// Writes the biased vector of `sample` into `out`.
    pub fn transform(&self, sample: &[f64], gamma: f64, out: &mut [f64]) {
        debug_assert_eq!(sample.len(), self.layout.values());
        debug_assert_eq!(out.len(), self.layout.width());

        out[..sample.len()].copy_from_slice(sample);
        for (j, &alpha) in self.grid.values().iter().enumerate() {
            out[self.layout.overlap(j)] = self.overlap_value(alpha, gamma);
        }
        out[self.layout.occupancy()] = fermi(self.grid.center(), self.reference_over_target(gamma));
    }

    /// Transforms `sample` and adds the result to `accumulator`.
    pub fn push(
        &mut self,
        sample: &[f64],
        gamma: f64,
        accumulator: &mut BlockRatioAccumulator<f64>,
    ) {
        let mut buffer = std::mem::take(&mut self.buffer);
        self.transform(sample, gamma, &mut buffer);
        accumulator.add_data(&buffer);
        self.buffer = buffer;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn grid() -> AlphaGrid {
        AlphaGrid::new(1.0, 4.0, 3).unwrap()
    }

    #[test]
    fn reference_chain_values() {
        let transform = OverlapWeightTransform::new(EnsembleKind::Reference, grid(), 1);
        let mut out = vec![0.0; 5];

        // w_target / w_ref = 2, hence x = 1/2
        transform.transform(&[3.0], 2.0, &mut out);
        assert_approx_eq!(out[0], 3.0, 1e-15);
        assert_approx_eq!(out[1], 1.0 / (1.0 + 0.25 * 0.5), 1e-15);
        assert_approx_eq!(out[2], 1.0 / 1.5, 1e-15);
        assert_approx_eq!(out[3], 1.0 / 3.0, 1e-15);
        assert_approx_eq!(out[4], 1.0 / 1.5, 1e-15);
    }

    #[test]
    fn target_chain_values() {
        let transform = OverlapWeightTransform::new(EnsembleKind::Target, grid(), 2);
        let mut out = vec![0.0; 6];

        transform.transform(&[-1.0, 0.5], 0.5, &mut out);
        assert_eq!(&out[..2], &[-1.0, 0.5]);
        assert_approx_eq!(out[2], 0.5 / (1.0 + 0.125), 1e-15);
        assert_approx_eq!(out[3], 0.5 / 1.5, 1e-15);
        assert_approx_eq!(out[4], 0.5 / 3.0, 1e-15);
        assert_approx_eq!(out[5], 1.0 / 1.5, 1e-15);
    }

    #[test]
    fn configurations_outside_of_the_overlap_region() {
        let reference = OverlapWeightTransform::new(EnsembleKind::Reference, grid(), 1);
        let target = OverlapWeightTransform::new(EnsembleKind::Target, grid(), 1);

        // the other integrand vanishes: no contribution to the overlap averages
        assert_eq!(reference.overlap_value(2.0, 0.0), 0.0);
        assert_eq!(target.overlap_value(2.0, 0.0), 0.0);

        // this integrand vanishes
        assert_eq!(reference.overlap_value(2.0, f64::INFINITY), 1.0);
        assert_approx_eq!(target.overlap_value(2.0, f64::INFINITY), 0.5, 1e-15);
    }

    #[test]
    fn both_chains_estimate_the_same_overlap_integral() {
        // a configuration with w_0 = 3, w_1 = 2: the overlap weight is w_0 w_1 / (w_1 + a w_0)
        let reference = OverlapWeightTransform::new(EnsembleKind::Reference, grid(), 1);
        let target = OverlapWeightTransform::new(EnsembleKind::Target, grid(), 1);
        let (w0, w1) = (3.0, 2.0);

        for &alpha in grid().values() {
            let overlap = w0 * w1 / (w1 + alpha * w0);
            assert_approx_eq!(w0 * reference.overlap_value(alpha, w1 / w0), overlap, 1e-14);
            assert_approx_eq!(w1 * target.overlap_value(alpha, w0 / w1), overlap, 1e-14);
        }
    }

    #[test]
    fn push_feeds_accumulator() {
        let mut transform = OverlapWeightTransform::new(EnsembleKind::Target, grid(), 1);
        let mut acc = BlockRatioAccumulator::with_full_covariance(5, 2).unwrap();
        transform.push(&[1.0], 1.0, &mut acc);
        transform.push(&[3.0], 1.0, &mut acc);
        assert_eq!(acc.block_count(), 1);
        assert_approx_eq!(acc.average(0), 2.0, 1e-15);
        assert_approx_eq!(acc.average(2), 0.5, 1e-15);
    }
}
