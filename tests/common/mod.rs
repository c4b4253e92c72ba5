use overlapmc::Ensemble;

use rand::Rng;
use rand_pcg::Pcg64;
use std::f64::consts::PI;

/// Unnormalized Gaussian weight `scale * exp(-x^2 / (2 width^2))`, whose integral is
/// `scale * width * sqrt(2 pi)`.
#[derive(Clone, Copy, Debug)]
pub struct Gaussian {
    pub scale: f64,
    pub width: f64,
}

impl Gaussian {
    pub fn weight(&self, x: f64) -> f64 {
        self.scale * (-0.5 * (x / self.width).powi(2)).exp()
    }

    pub fn integral(&self) -> f64 {
        self.scale * self.width * (2.0 * PI).sqrt()
    }
}

/// Draws independent configurations from `own` with Box-Muller and reports the weight of `other`
/// relative to `own`.
pub struct GaussianChain {
    rng: Pcg64,
    own: Gaussian,
    other: Gaussian,
    x: f64,
}

impl GaussianChain {
    pub fn new(own: Gaussian, other: Gaussian, stream: u128) -> Self {
        Self {
            rng: Pcg64::new(0xcafef00dd15ea5e5, stream),
            own,
            other,
            x: 0.0,
        }
    }
}

impl Ensemble for GaussianChain {
    fn advance(&mut self, values: &mut [f64]) {
        let u1 = 1.0 - self.rng.gen::<f64>();
        let u2 = self.rng.gen::<f64>();
        self.x = self.own.width * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        values[0] = 1.0;
    }

    fn weight_ratio(&self) -> f64 {
        self.other.weight(self.x) / self.own.weight(self.x)
    }
}

/// Chains for a reference and a target Gaussian, using PCG streams `2 * seed` and `2 * seed + 1`.
pub fn gaussian_pair(
    reference: Gaussian,
    target: Gaussian,
    seed: u128,
) -> (GaussianChain, GaussianChain) {
    (
        GaussianChain::new(reference, target, 2 * seed),
        GaussianChain::new(target, reference, 2 * seed + 1),
    )
}

/// Never leaves the support of its own weight and never touches the other's.
pub struct DisjointChain;

impl Ensemble for DisjointChain {
    fn advance(&mut self, values: &mut [f64]) {
        values[0] = 1.0;
    }

    fn weight_ratio(&self) -> f64 {
        0.0
    }
}
