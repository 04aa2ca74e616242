//! strobe Simulator CLI
//!
//! Run deterministic verification scenarios, or a JSON environment
//! configuration, against simulated buses.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strobe_core::EnvConfig;
use strobe_sim::scenarios::ScenarioId;
use strobe_sim::{ReportExport, ScenarioResult, ScenarioRunner, SimError};
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// strobe deterministic verification CLI
#[derive(Parser, Debug)]
#[command(name = "strobe-sim")]
#[command(about = "Run deterministic verification scenarios for strobe", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time); a --config file
    /// carries its own
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (concurrent_streams, timeout_drain, corrupted_field,
    /// passive_spy, weighted_arbitration, random_soak, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to run (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// RUN phase timeout in microseconds, overriding each scenario's own
    #[arg(short, long)]
    timeout_us: Option<u64>,

    /// Run this environment configuration (JSON) instead of the scenarios
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export every run report to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let result = match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(FmtSubscriber::builder().with_env_filter(filter).finish()),
        Err(_) => tracing::subscriber::set_global_default(FmtSubscriber::builder().with_max_level(level).finish()),
    };
    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn load_config(path: &Path) -> Result<EnvConfig, SimError> {
    let json = std::fs::read_to_string(path)?;
    Ok(EnvConfig::from_json(&json)?)
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if !args.json {
        info!("strobe simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let mut export = ReportExport::new(base_seed);

    if let Some(path) = &args.config {
        let config = match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Cannot load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        };
        for seed_offset in 0..args.seeds {
            let mut config = config.clone();
            config.seed = config.seed.wrapping_add(seed_offset as u64);
            let mut runner = ScenarioRunner::new(config.seed);
            if let Some(us) = args.timeout_us {
                runner = runner.with_run_timeout(Duration::from_micros(us));
            }
            let result = runner.run_config(config);
            log_result(&result, args.json);
            export.add(result);
        }
    } else {
        let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
            ScenarioId::all()
        } else {
            match args
                .scenario
                .parse::<ScenarioId>()
                .map_err(|_| SimError::UnknownScenario(args.scenario.clone()))
            {
                Ok(scenario) => vec![scenario],
                Err(e) => {
                    eprintln!("Error: {}", e);
                    eprintln!("Available scenarios:");
                    for scenario in ScenarioId::all() {
                        eprintln!("  {:<22} {}", scenario.name(), scenario.description());
                    }
                    std::process::exit(1);
                }
            }
        };

        for seed_offset in 0..args.seeds {
            let seed = base_seed.wrapping_add(seed_offset as u64);
            let mut runner = ScenarioRunner::new(seed);
            if let Some(us) = args.timeout_us {
                runner = runner.with_run_timeout(Duration::from_micros(us));
            }

            for scenario in &scenarios {
                let result = runner.run(*scenario);
                log_result(&result, args.json);
                export.add(result);
            }
        }
    }

    if let Some(path) = &args.export {
        match export.write_to_file(path) {
            Ok(()) => info!("Exported {} runs to {}", export.total, path.display()),
            Err(e) => error!("Failed to write export: {}", e),
        }
    }

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": export.total,
            "passed": export.passed,
            "failed": export.failed,
            "results": export.runs.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario,
                    "seed": r.seed,
                    "passed": r.passed,
                    "outcome": r.outcome().map(|o| o.to_string()),
                    "observed": r.report.as_ref().map(|rep| rep.observed_total()),
                    "end_time_ns": r.report.as_ref().map(|rep| u64::try_from(rep.end_time.as_nanos()).unwrap_or(u64::MAX)),
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if export.all_passed() {
            info!("✅ All {} runs passed!", export.total);
        } else {
            error!("❌ {}/{} runs failed!", export.failed, export.total);

            // List failed seeds
            for result in export.runs.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario,
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if !export.all_passed() {
        std::process::exit(1);
    }
}

fn log_result(result: &ScenarioResult, json: bool) {
    if json {
        return;
    }
    let summary = result
        .report
        .as_ref()
        .map(|r| r.summary())
        .unwrap_or_else(|| "no report".to_string());
    if result.passed {
        info!("✓ {} (seed={}) PASSED: {}", result.scenario, result.seed, summary);
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {} [{}]",
            result.scenario,
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown"),
            summary
        );
    }
}
