use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use flocksim_core::{AgentStore, BoidColumns, BoidVec, FlockConfig, Simulation, seed_lattice};
use std::time::Duration;

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn bench_setup<S: AgentStore>(population: usize) -> Simulation<S> {
    let config = FlockConfig {
        steps: u32::MAX,
        rng_seed: Some(0xBEEF),
        ..FlockConfig::default()
    };
    let (current, next) = seed_lattice::<S>(&config, population);
    Simulation::new(config, current, next).expect("simulation")
}

fn bench_flock_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("flock_step");
    group.sample_size(env_usize("FS_BENCH_SAMPLES", 30));
    group.warm_up_time(Duration::from_secs(
        env_usize("FS_BENCH_WARMUP_SECS", 2) as u64
    ));
    group.measurement_time(Duration::from_secs(
        env_usize("FS_BENCH_MEASURE_SECS", 10) as u64,
    ));

    let steps = env_usize("FS_BENCH_STEPS", 64);
    let populations: Vec<usize> = std::env::var("FS_BENCH_BOIDS")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|t| t.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![1600, 3200, 6400]);

    for &population in &populations {
        group.bench_function(format!("aos_steps{steps}_boids{population}"), |b| {
            b.iter_batched(
                || bench_setup::<BoidVec>(population),
                |mut sim| {
                    for _ in 0..steps {
                        sim.step();
                    }
                },
                BatchSize::LargeInput,
            );
        });
        group.bench_function(format!("soa_steps{steps}_boids{population}"), |b| {
            b.iter_batched(
                || bench_setup::<BoidColumns>(population),
                |mut sim| {
                    for _ in 0..steps {
                        sim.step();
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_flock_steps);
criterion_main!(benches);
