use overlapmc::callbacks::SimpleCallback;
use overlapmc::core::*;
use overlapmc::overlap::{DualChainScheduler, ReferenceParameterBootstrap};

use rand::Rng;
use rand_pcg::Pcg64;

/// Metropolis random walk through `dim` dimensions sampling `exp(-|x|^2 / (2 width^2))`.
struct GaussianWalk {
    rng: Pcg64,
    x: Vec<f64>,
    trial: Vec<f64>,
    width: f64,
    other_width: f64,
    step: f64,
}

impl GaussianWalk {
    fn new(width: f64, other_width: f64, dim: usize, stream: u128) -> Self {
        Self {
            rng: Pcg64::new(0xcafef00dd15ea5e5, stream),
            x: vec![0.0; dim],
            trial: vec![0.0; dim],
            width,
            other_width,
            step: width,
        }
    }

    fn r2(x: &[f64]) -> f64 {
        x.iter().map(|x| x * x).sum()
    }
}

impl Ensemble for GaussianWalk {
    fn advance(&mut self, values: &mut [f64]) {
        for (t, x) in self.trial.iter_mut().zip(&self.x) {
            *t = x + self.step * self.rng.gen_range(-1.0, 1.0);
        }
        let log_ratio = (Self::r2(&self.x) - Self::r2(&self.trial)) / (2.0 * self.width.powi(2));
        if log_ratio >= 0.0 || self.rng.gen::<f64>() < log_ratio.exp() {
            self.x.copy_from_slice(&self.trial);
        }
        values[0] = 1.0;
    }

    fn weight_ratio(&self) -> f64 {
        let r2 = Self::r2(&self.x);
        (0.5 * r2 * (self.width.powi(-2) - self.other_width.powi(-2))).exp()
    }
}

fn main() {
    let dim = 3;
    let (width0, width1) = (1.0, 1.3);

    let mut reference = GaussianWalk::new(width0, width1, dim, 1);
    let mut target = GaussianWalk::new(width1, width0, dim, 2);

    let config = SchedulerConfig {
        alpha_count: 11,
        alpha_span: 2.0,
        block_size: 10_000,
        sub_steps: 100,
        max_steps: 10_000,
        event_interval: 1000,
        warmup_steps: 100,
        ..SchedulerConfig::default()
    };
    // Initialize the random number generator.
    let rng = Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7ac28fa16a64abf96);

    let mut scheduler = DualChainScheduler::new(&mut reference, &mut target, config, rng)
        .unwrap_or_else(|err| panic!("invalid setup: {}", err));
    let bootstrap = ReferenceParameterBootstrap::new(BootstrapConfig {
        min_block_size: 100,
        ..BootstrapConfig::default()
    })
    .unwrap_or_else(|err| panic!("invalid bootstrap: {}", err));

    match bootstrap.run(&mut scheduler) {
        Ok(state) => println!("alpha center: {}", state.center()),
        Err(err) => panic!("bootstrap failed: {}", err),
    }

    if let Err(err) = scheduler.run_to_completion(&SimpleCallback {}) {
        panic!("production failed: {}", err);
    }

    match scheduler.report() {
        Ok(report) => println!("\n{}", report),
        Err(err) => println!("no report: {}", err),
    }
    println!("exact ratio: {}", (width1 / width0).powi(dim as i32));
}
