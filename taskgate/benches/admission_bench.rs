//! Benchmarks for admission decisions.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use taskgate::admission::{
    AdaptiveConfig, AdmissionConfig, AdmissionController, SlidingWindowConfig, TokenBucketConfig,
};
use taskgate::metrics::{MetricsConfig, MetricsFeed};
use taskgate::utils::{Clock, SystemClock};

fn controller(config: &AdmissionConfig) -> AdmissionController {
    let clock: Arc<dyn Clock> = SystemClock::shared();
    let metrics = Arc::new(MetricsFeed::with_clock(MetricsConfig::default(), clock.clone()));
    AdmissionController::from_config(config, metrics, clock)
}

fn admission_benchmark(c: &mut Criterion) {
    let configs = [
        AdmissionConfig::TokenBucket(TokenBucketConfig::new(1_000_000, 1_000_000.0, 1_000)),
        AdmissionConfig::SlidingWindow(SlidingWindowConfig::new(1_000_000, 60_000)),
        AdmissionConfig::Adaptive(AdaptiveConfig::new(1_000_000, 60_000)),
    ];

    let mut group = c.benchmark_group("allow");
    for config in &configs {
        let controller = controller(config);
        group.bench_with_input(
            BenchmarkId::new("single_key", config.algorithm()),
            &controller,
            |b, controller| b.iter(|| black_box(controller.allow_one("caller"))),
        );

        let keys: Vec<String> = (0..1_000).map(|i| format!("caller-{i}")).collect();
        let mut next = 0;
        group.bench_with_input(
            BenchmarkId::new("many_keys", config.algorithm()),
            &controller,
            |b, controller| {
                b.iter(|| {
                    next = (next + 1) % keys.len();
                    black_box(controller.allow_one(&keys[next]))
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, admission_benchmark);
criterion_main!(benches);
