//! FleetView simulator CLI
//!
//! Run deterministic scenarios against the tracking engine.

use clap::Parser;
use fleetview_core::EngineConfig;
use fleetview_sim::{ScenarioId, ScenarioResult, ScenarioRunner, SimConfig, SimError};
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// FleetView deterministic simulation CLI
#[derive(Parser, Debug)]
#[command(name = "fleetview-sim")]
#[command(about = "Run deterministic simulation scenarios for FleetView", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of vehicles (at least 6)
    #[arg(short = 'n', long, default_value = "6")]
    vehicles: usize,

    /// Scenario to run (follow_operator, group_fit, manual_override, feed_dropout, alias_chaos, widget_faults, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Minimum simulation duration in seconds
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Engine configuration JSON file
    #[arg(short, long)]
    config: Option<String>,

    /// Simulation configuration JSON file (vehicles, noise, frame rate)
    #[arg(long)]
    sim_config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export frame-by-frame data for a single scenario to this file
    #[arg(long)]
    export: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    match run(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}

/// Runs the requested scenarios and returns the number of failures.
fn run(args: &Args) -> Result<usize, SimError> {
    if !args.json {
        info!("FleetView Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!(
                    "Available scenarios: {}, all",
                    ScenarioId::all().iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
                );
                return Ok(1);
            }
        }
    };

    let engine_config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let mut sim_config = match &args.sim_config {
        Some(path) => SimConfig::from_json_file(path)?,
        None => SimConfig::default(),
    };
    sim_config.vehicles = sim_config.vehicles.max(args.vehicles);
    sim_config.duration_secs = args.duration;

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let runner_for = |seed: u64| {
        ScenarioRunner::new(seed)
            .with_config(SimConfig {
                seed,
                ..sim_config.clone()
            })
            .with_engine_config(engine_config.clone())
    };

    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            return Ok(1);
        }
        let scenario = scenarios[0];
        info!("Running with export to: {}", export_path);

        let (result, export) = runner_for(base_seed).run_with_export(scenario);
        export.write_to_file(export_path)?;
        info!("Exported {} frames to {}", export.frames.len(), export_path);
        report(&result, args.json);
        return Ok(usize::from(!result.passed));
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = runner_for(seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result, false);
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "frames": r.total_frames,
                    "time_secs": r.final_time_secs,
                    "entities": r.final_entity_count,
                    "camera_mode": r.camera_mode,
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    Ok(failed_count)
}

fn report(result: &ScenarioResult, json: bool) {
    if json {
        return;
    }
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED | camera={} entities={} pans={}",
            result.scenario.name(),
            result.seed,
            result.camera_mode,
            result.final_entity_count,
            result.metrics.pans
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}
