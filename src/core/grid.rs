//! Log-spaced grids of bias parameters.
use crate::core::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// An ordered set of bias parameters $\alpha_i$, log-spaced and symmetric around a center $c$:
///
/// $$ \alpha_i = c \, s^{(2i - (n-1))/(n-1)}, \qquad i = 0, \ldots, n-1 $$
///
/// so that the grid covers $[c/s, c s]$. A grid with a single point only contains $c$.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AlphaGrid {
    center: f64,
    span: f64,
    alpha: Vec<f64>,
}

impl AlphaGrid {
    /// Constructs a grid with `count` points centered at `center` that covers the multiplicative
    /// range from `center / span` to `center * span`.
    pub fn new(center: f64, span: f64, count: usize) -> EngineResult<Self> {
        if !(center.is_finite() && center > 0.0) {
            return Err(EngineError::InvalidConfiguration(format!(
                "alpha center must be finite and positive, got {}",
                center
            )));
        }
        if count == 0 {
            return Err(EngineError::InvalidConfiguration(
                "alpha grid needs at least one point".to_string(),
            ));
        }
        if count == 1 {
            return Ok(Self::single(center));
        }
        if !(span.is_finite() && span > 1.0) {
            return Err(EngineError::InvalidConfiguration(format!(
                "alpha span must be finite and larger than one for {} points, got {}",
                count, span
            )));
        }

        let ln_span = span.ln();
        let half = (count - 1) as f64 / 2.0;
        let alpha = (0..count)
            .map(|i| center * (ln_span * (i as f64 - half) / half).exp())
            .collect();

        Ok(Self {
            center,
            span,
            alpha,
        })
    }

    /// A grid consisting of `center` only.
    pub fn single(center: f64) -> Self {
        Self {
            center,
            span: 1.0,
            alpha: vec![center],
        }
    }

    /// Returns the center of the grid.
    pub fn center(&self) -> f64 {
        self.center
    }

    /// Returns the multiplicative half-width of the grid.
    pub fn span(&self) -> f64 {
        self.span
    }

    /// Returns the number of grid points.
    pub fn len(&self) -> usize {
        self.alpha.len()
    }

    /// Grids are never empty, this exists for symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.alpha.is_empty()
    }

    /// Returns the `i`th bias parameter.
    pub fn alpha(&self, i: usize) -> f64 {
        self.alpha[i]
    }

    /// Returns all bias parameters in increasing order.
    pub fn values(&self) -> &[f64] {
        &self.alpha
    }

    /// Smallest bias parameter.
    pub fn min(&self) -> f64 {
        self.alpha[0]
    }

    /// Largest bias parameter.
    pub fn max(&self) -> f64 {
        self.alpha[self.alpha.len() - 1]
    }

    /// Finds the grid interval containing `alpha` and returns its lower index together with the
    /// interpolation weight of the upper point, linear in $\ln \alpha$.
    pub fn bracket(&self, alpha: f64) -> EngineResult<(usize, f64)> {
        let out_of_range = || EngineError::AlphaOutOfRange {
            alpha,
            min: self.min(),
            max: self.max(),
        };

        if !(alpha.is_finite() && alpha > 0.0) || alpha < self.min() || alpha > self.max() {
            return Err(out_of_range());
        }

        if self.alpha.len() == 1 {
            return Ok((0, 0.0));
        }

        let ln_alpha = alpha.ln();
        for i in 0..self.alpha.len() - 1 {
            let lo = self.alpha[i].ln();
            let hi = self.alpha[i + 1].ln();
            if ln_alpha <= hi {
                return Ok((i, (ln_alpha - lo) / (hi - lo)));
            }
        }

        Err(out_of_range())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn grid_is_symmetric_in_log() {
        for &(center, span, count) in &[(1.0, 30.0, 21), (0.37, 4.0, 15), (12.5, 1.5, 2)] {
            let grid = AlphaGrid::new(center, span, count).unwrap();
            assert_eq!(grid.len(), count);

            for w in grid.values().windows(2) {
                assert!(w[1] > w[0]);
            }

            for i in 0..count {
                let lhs = grid.alpha(i).ln() - center.ln();
                let rhs = grid.alpha(count - 1 - i).ln() - center.ln();
                assert_approx_eq!(lhs, -rhs, 1e-12);
            }

            assert_approx_eq!(grid.min(), center / span, 1e-12 * center);
            assert_approx_eq!(grid.max(), center * span, 1e-12 * center * span);
        }
    }

    #[test]
    fn odd_grid_contains_center() {
        let grid = AlphaGrid::new(2.0, 5.0, 11).unwrap();
        assert_approx_eq!(grid.alpha(5), 2.0, 1e-14);
    }

    #[test]
    fn single_point_grid() {
        let grid = AlphaGrid::new(3.0, 1.0, 1).unwrap();
        assert_eq!(grid.values(), &[3.0]);
        assert_eq!(grid.span(), 1.0);
    }

    #[test]
    fn invalid_grids() {
        assert!(AlphaGrid::new(0.0, 2.0, 3).is_err());
        assert!(AlphaGrid::new(-1.0, 2.0, 3).is_err());
        assert!(AlphaGrid::new(1.0, 1.0, 3).is_err());
        assert!(AlphaGrid::new(1.0, 2.0, 0).is_err());
        assert!(AlphaGrid::new(f64::NAN, 2.0, 1).is_err());
    }

    #[test]
    fn bracket_interpolates_in_log() {
        let grid = AlphaGrid::new(1.0, 4.0, 3).unwrap();

        let (i, fac) = grid.bracket(2.0).unwrap();
        assert_eq!(i, 1);
        assert_approx_eq!(fac, 0.5, 1e-14);

        let (i, fac) = grid.bracket(grid.min()).unwrap();
        assert_eq!(i, 0);
        assert_approx_eq!(fac, 0.0, 1e-14);

        let (i, fac) = grid.bracket(grid.max()).unwrap();
        assert_eq!(i, 1);
        assert_approx_eq!(fac, 1.0, 1e-14);

        assert!(grid.bracket(5.0).is_err());
        assert!(grid.bracket(0.1).is_err());
    }
}
