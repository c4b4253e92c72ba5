use criterion::{black_box, criterion_group, criterion_main, Criterion};

use overlapmc::callbacks::SinkCallback;
use overlapmc::core::*;
use overlapmc::overlap::DualChainScheduler;

use rand::Rng;
use rand_pcg::Pcg64;

/// Uniform configurations in `[0, 1)` of a reference weight `1` and a target weight `2 x`, whose
/// integrals are `1` each.
struct LinearChain {
    rng: Pcg64,
    kind: EnsembleKind,
    x: f64,
}

impl Ensemble for LinearChain {
    fn advance(&mut self, values: &mut [f64]) {
        self.x = match self.kind {
            EnsembleKind::Reference => self.rng.gen::<f64>(),
            // inverse transform sampling of the density 2 x
            EnsembleKind::Target => self.rng.gen::<f64>().sqrt(),
        };
        values[0] = 1.0;
    }

    fn weight_ratio(&self) -> f64 {
        match self.kind {
            EnsembleKind::Reference => 2.0 * self.x,
            EnsembleKind::Target => 0.5 / self.x,
        }
    }
}

fn benchmark_scheduler(alpha_count: usize) {
    let chain = |kind, stream| LinearChain {
        rng: Pcg64::new(0xcafef00dd15ea5e5, stream),
        kind,
        x: 0.5,
    };
    let mut reference = chain(EnsembleKind::Reference, 1);
    let mut target = chain(EnsembleKind::Target, 2);
    let config = SchedulerConfig {
        alpha_count,
        alpha_span: 4.0,
        block_size: 100,
        sub_steps: 100,
        max_steps: 100,
        step_cost: StepCost::Uniform,
        ..SchedulerConfig::default()
    };
    // Initialize the random number generator.
    let rng = Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7ac28fa16a64abf96);

    let mut scheduler = DualChainScheduler::new(&mut reference, &mut target, config, rng).unwrap();
    scheduler.run_to_completion(&SinkCallback {}).unwrap();
    black_box(scheduler.coordinator().unwrap().ratio_estimate().ok());
}

fn criterion_overlap_benchmark(c: &mut Criterion) {
    c.bench_function("scheduler single alpha", |b| {
        b.iter(|| benchmark_scheduler(1))
    });
    c.bench_function("scheduler 15 alphas", |b| b.iter(|| benchmark_scheduler(15)));
}

criterion_group!(benches, criterion_overlap_benchmark);
criterion_main!(benches);
