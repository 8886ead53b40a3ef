//! Co-simulation scenario CLI
//!
//! Runs the coupling, loose and message scenarios on the in-process federation.

use clap::Parser;
use cosim_env::SimTime;
use cosim_sim::{RunExport, ScenarioId, ScenarioResult, ScenarioRunner, SimConfig};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Co-simulation deterministic scenario CLI
#[derive(Parser, Debug)]
#[command(name = "cosim-sim")]
#[command(about = "Run deterministic co-simulation scenarios", long_about = None)]
struct Args {
    /// Seed for random filters
    #[arg(short, long)]
    seed: Option<u64>,

    /// Scenario to run (nonlinear, on_update, three_way, iteration_cap, loose, messages, filter_reconfig, random_filters, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Instants per coupling scenario
    #[arg(short, long)]
    instants: Option<u32>,

    /// Instant spacing in seconds
    #[arg(short, long)]
    time_step: Option<f64>,

    /// JSON file with harness settings; flags override it
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the run trace to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Co-simulation scenario runner v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let mut config = match &args.config {
        Some(path) => SimConfig::from_json_file(path).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }),
        None => SimConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(instants) = args.instants {
        config.instants = instants;
    }
    if let Some(secs) = args.time_step {
        config.time_step = SimTime::from_secs_f64(secs);
    }
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!(
                "Available scenarios: {}, all",
                ScenarioId::all()
                    .iter()
                    .map(|s| s.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            std::process::exit(1);
        })]
    };

    if args.export.is_some() && scenarios.len() > 1 {
        eprintln!("Error: --export only supports a single scenario, not 'all'");
        std::process::exit(1);
    }

    let runner = ScenarioRunner::from_config(config);
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for scenario in &scenarios {
        let result = runner.run(*scenario);
        if !args.json {
            if result.passed {
                info!(
                    "✓ {} (seed={}) PASSED | instants={} iterations={} forced={} messages={}",
                    scenario.name(),
                    result.seed,
                    result.metrics.instants,
                    result.metrics.total_iterations,
                    result.metrics.forced_instants,
                    result.metrics.broker.messages_delivered,
                );
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
        if !result.passed {
            failed_count += 1;
        }

        if let Some(path) = &args.export {
            let export = RunExport::from_result(&result);
            match export.write_to_file(path) {
                Ok(()) => info!("Exported {} frames to {}", export.frames.len(), path),
                Err(e) => {
                    error!("Failed to write export: {}", e);
                    failed_count += 1;
                }
            }
        }
        all_results.push(result);
    }

    // Summary
    let total = all_results.len();
    let passed = total - all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": total - passed,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "instants": r.metrics.instants,
                    "iterations": r.metrics.total_iterations,
                    "forced_instants": r.metrics.forced_instants,
                    "max_error": r.metrics.max_error,
                    "time_secs": r.metrics.final_time_secs,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", total - passed, total);
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

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
