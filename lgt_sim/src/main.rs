//! Scenario CLI.
//!
//! Runs the deterministic tracking scenarios and reports pass/fail, with
//! optional CSV/JSON export for diagnostics.

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use lgt_sim::exporter::{write_csv, SimExport};
use lgt_sim::{ScenarioId, ScenarioResult, ScenarioRunner};

/// Deterministic tracking scenario runner.
#[derive(Parser, Debug)]
#[command(name = "lgt-sim")]
#[command(about = "Run deterministic tracking scenarios", long_about = None)]
struct Args {
    /// Scenario to run (or "all").
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Seed for the tracker's PRNG.
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON summary output for CI parsing.
    #[arg(long)]
    json: bool,

    /// Write a CSV trajectory export for the (single) scenario run.
    #[arg(long)]
    csv: Option<String>,

    /// Write a JSON diagnostics export for the (single) scenario run.
    #[arg(long)]
    export: Option<String>,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("error: {e}");
            eprintln!(
                "available scenarios: {}",
                ScenarioId::all()
                    .iter()
                    .map(|s| s.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            std::process::exit(1);
        })]
    };

    if (args.csv.is_some() || args.export.is_some()) && scenarios.len() > 1 {
        eprintln!("error: --csv/--export only support a single scenario, not \"all\"");
        std::process::exit(1);
    }

    let runner = ScenarioRunner::new(args.seed);
    let results: Vec<ScenarioResult> = scenarios.iter().map(|s| runner.run(*s)).collect();

    if let Some(path) = &args.csv {
        if let Err(e) = write_csv(&results[0].frames, path) {
            error!("failed to write csv: {e}");
        } else {
            info!("wrote trajectory to {path}");
        }
    }
    if let Some(path) = &args.export {
        let export = SimExport::from_result(&results[0]);
        if let Err(e) = export.write_json(path) {
            error!("failed to write export: {e}");
        } else {
            info!("wrote export to {path}");
        }
    }

    let failed = results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": results.len(),
            "passed": results.len() - failed,
            "failed": failed,
            "results": results.iter().map(|r| serde_json::json!({
                "scenario": r.scenario.name(),
                "seed": r.seed,
                "passed": r.passed,
                "failure_reason": r.failure_reason,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary).unwrap());
    } else {
        for result in &results {
            if result.passed {
                info!("PASS {} (seed={})", result.scenario.name(), result.seed);
            } else {
                error!(
                    "FAIL {} (seed={}): {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
        if failed == 0 {
            info!("all {} scenarios passed", results.len());
        } else {
            error!("{failed}/{} scenarios failed", results.len());
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
}
