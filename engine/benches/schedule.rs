//! Micro-benchmarks for schedule generation and rolling percentiles
//!
//! These benchmarks cover the work done before and during dispatch:
//! - Arrival offsets for each pattern at increasing request counts
//! - Guard observations (window update plus p95) at several window sizes
//!
//! Run with: cargo bench --bench schedule

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use kvmini_engine::guard::{AdmissionGuard, GuardConfig};
use kvmini_engine::schedule::{self, ArrivalPattern, ScheduleOverrides};

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_generate");

    let patterns = [
        ArrivalPattern::Steady,
        ArrivalPattern::Poisson,
        ArrivalPattern::Bursty,
        ArrivalPattern::Heavy,
    ];

    for requests in [1_000usize, 100_000] {
        group.throughput(Throughput::Elements(requests as u64));
        for pattern in patterns {
            let params = schedule::plan(pattern, requests, 64, ScheduleOverrides::default())
                .expect("valid schedule");
            group.bench_with_input(
                BenchmarkId::new(pattern.as_str(), requests),
                &params,
                |b, params| {
                    let mut rng = schedule::seeded_rng(42);
                    b.iter(|| black_box(schedule::generate(params, &mut rng)))
                },
            );
        }
    }

    group.finish();
}

fn bench_guard_observe(c: &mut Criterion) {
    let mut group = c.benchmark_group("guard_observe");

    for window in [50usize, 500, 5_000] {
        let guard = AdmissionGuard::new(GuardConfig {
            p95_budget: Some(Duration::from_millis(500)),
            window,
            cooldown: Duration::from_secs(2),
        });
        // Fill the window so every iteration evicts
        for i in 0..window {
            guard.observe(Duration::from_millis((i % 400) as u64));
        }

        let mut i = 0u64;
        group.bench_with_input(BenchmarkId::new("window", window), &window, |b, _| {
            b.iter(|| {
                i += 1;
                black_box(guard.observe(Duration::from_millis(i % 400)))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_generate, bench_guard_observe);
criterion_main!(benches);
