//! Command-line front end for the cycle profiler.
//!
//! # Usage
//!
//! ```bash
//! # Estimate the counter frequency three times with a 250 ms window
//! cargo run --features cli --bin cycleprof -- freq --window-ms 250 --runs 3
//!
//! # Compare OS timer and CPU counter over 1 s
//! cargo run --features cli --bin cycleprof -- timers --millis 1000
//!
//! # Profile the built-in nested workload and print JSON
//! cargo run --features cli --bin cycleprof -- demo --iterations 100000 --json
//! ```

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rand::Rng;
use tracing_subscriber::EnvFilter;

use cycleprof::measurement::{os_timer, rdtsc, FrequencyEstimator, OsClock, Tsc, WallClock};
use cycleprof::output::to_json_pretty;
use cycleprof::{Config, ProfileError, Profiler};

/// Hierarchical CPU-cycle profiler utilities
#[derive(Parser, Debug)]
#[command(name = "cycleprof")]
#[command(version, about = "Inspect the cycle counter and run a profiled demo workload")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Estimate the cycle counter frequency
    Freq {
        /// Calibration window in milliseconds
        #[arg(long, default_value_t = cycleprof::DEFAULT_CALIBRATION_MS)]
        window_ms: u64,

        /// Do not pin the thread to one CPU while calibrating
        #[arg(long)]
        no_pin: bool,

        /// Number of estimates to take
        #[arg(long, default_value_t = 1)]
        runs: u32,
    },

    /// Busy-poll the OS clock and print both timers over the interval
    Timers {
        /// Interval to poll for, in milliseconds
        #[arg(long, default_value_t = 1000)]
        millis: u64,
    },

    /// Run a nested workload under the profiler and print the report
    Demo {
        /// Number of generated pairs
        #[arg(long, default_value_t = 100_000)]
        iterations: usize,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Freq {
            window_ms,
            no_pin,
            runs,
        } => {
            run_freq(window_ms, !no_pin, runs);
            Ok(())
        }
        Commands::Timers { millis } => {
            run_timers(millis);
            Ok(())
        }
        Commands::Demo { iterations, json } => run_demo(iterations, json),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run_freq(window_ms: u64, pin: bool, runs: u32) {
    let estimator = FrequencyEstimator::new(Tsc, OsClock)
        .window(Duration::from_millis(window_ms))
        .pin_thread(pin);

    println!("Counter: {}", Tsc.name());
    for run in 1..=runs.max(1) {
        let hz = estimator.estimate();
        if hz == 0 {
            println!("[{}] CPU freq unknown (wall clock did not advance)", run);
        } else {
            println!("[{}] CPU freq {} ({:.4} GHz)", run, hz, hz as f64 / 1e9);
        }
    }
}

fn run_timers(millis: u64) {
    let clock = OsClock;
    let wait = millis.saturating_mul(clock.ticks_per_second()) / 1000;

    let cpu_start = rdtsc();
    let os_start = os_timer();
    let mut os_end = os_start;
    let mut os_elapsed = 0;
    while os_elapsed < wait {
        os_end = os_timer();
        os_elapsed = os_end - os_start;
    }
    let cpu_end = rdtsc();
    let cpu_elapsed = cpu_end.wrapping_sub(cpu_start);

    println!("OS Freq: {}", clock.ticks_per_second());
    println!("OS Timer: {} -> {} = {} elapsed", os_start, os_end, os_elapsed);
    println!(
        "OS Seconds: {:.4}",
        os_elapsed as f64 / clock.ticks_per_second() as f64
    );
    println!("CPU Timer: {} -> {} = {} elapsed", cpu_start, cpu_end, cpu_elapsed);
}

#[derive(Debug, Clone, Copy)]
struct Pair {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

fn run_demo(iterations: usize, json: bool) -> Result<(), ProfileError> {
    let profiler = Profiler::from_config(Config::from_env());
    profiler.start();

    let pairs = {
        let _scope = profiler.scope("generate");
        let mut rng = rand::thread_rng();
        (0..iterations)
            .map(|_| Pair {
                x0: rng.gen_range(-180.0..180.0),
                y0: rng.gen_range(-90.0..90.0),
                x1: rng.gen_range(-180.0..180.0),
                y1: rng.gen_range(-90.0..90.0),
            })
            .collect::<Vec<_>>()
    };

    let average = {
        let _scope = profiler.scope("sum");
        let total: f64 = pairs.iter().map(|pair| haversine(&profiler, pair)).sum();
        total / pairs.len().max(1) as f64
    };

    let report = profiler.finish()?;
    if json {
        match to_json_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(err) => eprintln!("error: failed to serialize report: {}", err),
        }
    } else {
        println!("Pairs: {}", pairs.len());
        println!("Average distance: {:.6} km", average);
        print!("{}", report);
    }
    Ok(())
}

const EARTH_RADIUS_KM: f64 = 6372.8;

fn haversine<C: cycleprof::CycleCounter>(profiler: &Profiler<C>, pair: &Pair) -> f64 {
    let _scope = profiler.scope("haversine");

    let dlat = (pair.y1 - pair.y0).to_radians();
    let dlon = (pair.x1 - pair.x0).to_radians();
    let lat0 = pair.y0.to_radians();
    let lat1 = pair.y1.to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat0.cos() * lat1.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}
