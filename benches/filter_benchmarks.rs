//! Particle filter benchmarks using Criterion.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use sports_pf_rs::{
    FilterConfig, LiveGameConfig, LiveGameFilter, PlayerFilterConfig, PlayerObservation,
    PlayerPerformanceFilter, ResamplingStrategy,
};

const PARTICLE_COUNTS: [usize; 2] = [1000, 5000];

/// Normalized random weights for resampling benchmarks.
fn random_weights(n: usize) -> Vec<f64> {
    let mut rng = SmallRng::seed_from_u64(0);
    let raw: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// One observe step (predict + update + conditional resample) for a player.
fn benchmark_player_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("player_step");
    for &n in &PARTICLE_COUNTS {
        let config = PlayerFilterConfig {
            filter: FilterConfig::new(n).with_seed(1),
            ..PlayerFilterConfig::default()
        };
        let mut filter = PlayerPerformanceFilter::new(config).expect("valid config");
        let mut time = 0.0;

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                time += 1.0;
                filter
                    .observe(black_box(&PlayerObservation::new(time, 18)))
                    .expect("step succeeds")
            })
        });
    }
    group.finish();
}

/// Score update including the forward simulation to the final buzzer.
fn benchmark_live_game_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("live_game_update");
    for &n in &PARTICLE_COUNTS {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || {
                    LiveGameFilter::new(LiveGameConfig {
                        filter: FilterConfig::new(n).with_seed(2),
                        ..LiveGameConfig::new(5.0, 3.0)
                    })
                    .expect("valid config")
                },
                |mut game| {
                    game.update_with_score(black_box(24.0), 60, 50)
                        .expect("update succeeds")
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn benchmark_resampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("resampling");
    for &n in &PARTICLE_COUNTS {
        let weights = random_weights(n);
        let mut out = vec![0usize; n];
        let mut rng = SmallRng::seed_from_u64(3);
        for strategy in [
            ResamplingStrategy::Systematic,
            ResamplingStrategy::Stratified,
            ResamplingStrategy::Multinomial,
        ] {
            group.bench_with_input(BenchmarkId::new(strategy.name(), n), &n, |b, _| {
                b.iter(|| {
                    strategy
                        .resample_into(black_box(&weights), &mut rng, &mut out)
                        .expect("valid weights")
                })
            });
        }
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_player_step,
    benchmark_live_game_update,
    benchmark_resampling,
);
criterion_main!(benches);
