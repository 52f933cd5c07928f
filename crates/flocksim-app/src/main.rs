use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use flocksim_core::{BoidColumns, BoidVec, FlockConfig, FlockError, run_timed};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "flocksim",
    version,
    about = "Benchmark harness for the FlockSim flocking core"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Time a single simulation run.
    Run {
        /// Number of agents in the flock.
        #[arg(long, default_value_t = 1600)]
        boids: usize,
        /// Number of simulation steps.
        #[arg(long, default_value_t = 600)]
        steps: u32,
        /// Memory layout of the agent state store.
        #[arg(long, value_enum, default_value_t = Layout::Aos)]
        layout: Layout,
        /// Worker threads for the rayon pool (defaults to all cores).
        #[arg(long)]
        threads: Option<usize>,
        /// RNG seed for a reproducible population.
        #[arg(long)]
        seed: Option<u64>,
        /// Build the grid with the partition-then-merge parallel path.
        #[arg(long)]
        parallel_grid: bool,
    },
    /// Compare layouts across thread counts and write a results table.
    Compare {
        /// Number of agents in the flock.
        #[arg(long, default_value_t = 1600)]
        boids: usize,
        /// Number of simulation steps per trial.
        #[arg(long, default_value_t = 600)]
        steps: u32,
        /// Trials averaged per measurement.
        #[arg(long, default_value_t = 5)]
        trials: u32,
        /// Comma-separated worker thread counts to test.
        #[arg(long, value_delimiter = ',', default_value = "1,2,4,8")]
        threads: Vec<usize>,
        /// RNG seed shared by every trial.
        #[arg(long, default_value_t = 0xF10C)]
        seed: u64,
        /// Where to write the results table.
        #[arg(long, default_value = "speedup.txt")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Layout {
    /// Array-of-structures agent store.
    Aos,
    /// Structure-of-arrays agent store.
    Soa,
}

impl Layout {
    const ALL: [Self; 2] = [Self::Aos, Self::Soa];

    fn label(self) -> &'static str {
        match self {
            Self::Aos => "aos",
            Self::Soa => "soa",
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            boids,
            steps,
            layout,
            threads,
            seed,
            parallel_grid,
        } => run_command(boids, steps, layout, threads, seed, parallel_grid),
        Command::Compare {
            boids,
            steps,
            trials,
            threads,
            seed,
            output,
        } => compare_command(boids, steps, trials, &threads, seed, &output),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn run_command(
    boids: usize,
    steps: u32,
    layout: Layout,
    threads: Option<usize>,
    seed: Option<u64>,
    parallel_grid: bool,
) -> Result<()> {
    let config = FlockConfig {
        steps,
        parallel_grid_build: parallel_grid,
        rng_seed: seed,
        ..FlockConfig::default()
    };
    let elapsed = timed_run(layout, &config, boids, threads)?;
    info!(
        boids,
        steps,
        layout = layout.label(),
        threads = threads.unwrap_or_else(rayon::current_num_threads),
        "run complete"
    );
    println!("TIME={} seconds", elapsed.as_secs_f64());
    Ok(())
}

struct CompareRecord {
    threads: usize,
    layout: Layout,
    elapsed_secs: f64,
    speedup: f64,
}

fn compare_command(
    boids: usize,
    steps: u32,
    trials: u32,
    threads: &[usize],
    seed: u64,
    output: &Path,
) -> Result<()> {
    anyhow::ensure!(trials > 0, "at least one trial is required");
    anyhow::ensure!(!threads.is_empty(), "at least one thread count is required");

    let config = FlockConfig {
        steps,
        rng_seed: Some(seed),
        ..FlockConfig::default()
    };

    let mut records = Vec::new();
    for layout in Layout::ALL {
        let baseline = average_elapsed(layout, &config, boids, Some(1), trials)?;
        info!(
            layout = layout.label(),
            baseline_secs = baseline.as_secs_f64(),
            "single-thread baseline"
        );
        for &count in threads {
            let elapsed = if count == 1 {
                baseline
            } else {
                average_elapsed(layout, &config, boids, Some(count), trials)?
            };
            let speedup = baseline.as_secs_f64() / elapsed.as_secs_f64();
            if count > 1 && speedup < 1.0 {
                warn!(
                    layout = layout.label(),
                    threads = count,
                    "parallel run slower than the single-thread baseline"
                );
            }
            info!(
                layout = layout.label(),
                threads = count,
                elapsed_secs = elapsed.as_secs_f64(),
                speedup,
                "measurement"
            );
            records.push(CompareRecord {
                threads: count,
                layout,
                elapsed_secs: elapsed.as_secs_f64(),
                speedup,
            });
        }
    }

    let file = File::create(output)
        .with_context(|| format!("failed to create results file {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "# boids={boids} steps={steps} trials={trials}")?;
    writeln!(writer, "# threads layout elapsed_secs speedup")?;
    for record in &records {
        writeln!(
            writer,
            "{} {} {:.6} {:.3}",
            record.threads,
            record.layout.label(),
            record.elapsed_secs,
            record.speedup
        )?;
    }
    writer.flush()?;
    info!(results = %output.display(), "comparison written");
    Ok(())
}

fn average_elapsed(
    layout: Layout,
    config: &FlockConfig,
    boids: usize,
    threads: Option<usize>,
    trials: u32,
) -> Result<Duration> {
    let mut total = Duration::ZERO;
    for _ in 0..trials {
        total += timed_run(layout, config, boids, threads)?;
    }
    Ok(total / trials)
}

fn timed_run(
    layout: Layout,
    config: &FlockConfig,
    boids: usize,
    threads: Option<usize>,
) -> Result<Duration> {
    let elapsed = match threads {
        Some(count) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(count)
                .build()
                .context("failed to build worker pool")?;
            pool.install(|| dispatch(layout, config, boids))?
        }
        None => dispatch(layout, config, boids)?,
    };
    Ok(elapsed)
}

fn dispatch(layout: Layout, config: &FlockConfig, boids: usize) -> Result<Duration, FlockError> {
    match layout {
        Layout::Aos => run_timed::<BoidVec>(config, boids),
        Layout::Soa => run_timed::<BoidColumns>(config, boids),
    }
}
