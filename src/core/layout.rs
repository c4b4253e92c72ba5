//! Named components of the vectors fed into the accumulators.
use crate::core::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Names one component of a biased vector, so that callers never compute flat offsets by hand.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ComponentId {
    /// The primary value of the chain: the reference integrand in the reference chain, the
    /// target integrand in the target chain.
    Value,
    /// An auxiliary target value, measured along with the primary one.
    ExtraTarget(usize),
    /// The overlap average for the grid point with the given index.
    Overlap(usize),
    /// Fermi weight at the grid center, tracking how often the chain visits the overlap region.
    Occupancy,
}

/// Layout of a biased vector: `values` raw values, one overlap value per grid point and a
/// trailing occupancy weight.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VectorLayout {
    values: usize,
    alphas: usize,
}

impl VectorLayout {
    /// Constructor.
    pub const fn new(values: usize, alphas: usize) -> Self {
        Self { values, alphas }
    }

    /// Recovers the layout from the total width of a vector and the grid size.
    pub fn from_width(width: usize, alphas: usize) -> EngineResult<Self> {
        if width < alphas + 2 {
            return Err(EngineError::InvalidConfiguration(format!(
                "vector of width {} cannot hold a value, {} overlap values and the occupancy",
                width, alphas
            )));
        }
        Ok(Self::new(width - alphas - 1, alphas))
    }

    /// Number of raw values.
    pub const fn values(&self) -> usize {
        self.values
    }

    /// Number of grid points.
    pub const fn alphas(&self) -> usize {
        self.alphas
    }

    /// Total width of the vector.
    pub const fn width(&self) -> usize {
        self.values + self.alphas + 1
    }

    /// Maps a named component to its offset.
    pub fn index(&self, id: ComponentId) -> EngineResult<usize> {
        let index = match id {
            ComponentId::Value => 0,
            ComponentId::ExtraTarget(i) => 1 + i,
            ComponentId::Overlap(j) => {
                if j >= self.alphas {
                    return Err(EngineError::ComponentOutOfRange {
                        index: self.values + j,
                        width: self.width(),
                    });
                }
                self.values + j
            }
            ComponentId::Occupancy => self.width() - 1,
        };

        if let ComponentId::ExtraTarget(_) = id {
            if index >= self.values {
                return Err(EngineError::ComponentOutOfRange {
                    index,
                    width: self.width(),
                });
            }
        }

        Ok(index)
    }

    pub(crate) const fn overlap(&self, j: usize) -> usize {
        self.values + j
    }

    pub(crate) const fn occupancy(&self) -> usize {
        self.values + self.alphas
    }

    /// The pairs whose covariance the coordinator needs: every value against every overlap value
    /// and the primary value against every auxiliary value. Diagonal entries are always tracked.
    pub fn required_pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::with_capacity(self.values * (self.alphas + 1));
        for k in 0..self.values {
            for j in 0..self.alphas {
                pairs.push((k, self.overlap(j)));
            }
        }
        for k in 1..self.values {
            pairs.push((0, k));
        }
        pairs
    }
}
