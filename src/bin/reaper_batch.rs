//! reaper-batch: inspect or clear a persisted batch file.
//!
//! Run: cargo run --bin reaper-batch -- <batch-file> [--json] [--clear] [--config <file>]

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use reaper::{BatchStore, ReaperConfig};

const USAGE: &str = "Usage: reaper-batch <batch-file> [--json] [--clear] [--config <config.json>]";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchReport {
    path: String,
    started_at_ms: u64,
    elapsed_secs: u64,
    batch_window_secs: u64,
    window_elapsed: bool,
    types: Vec<String>,
}

fn print_help() {
    println!("reaper-batch {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Inspect the batch of sampled type names persisted by reaper");
    println!();
    println!("{}", USAGE);
    println!();
    println!("Arguments:");
    println!("  <batch-file>   Path of the persisted batch");
    println!("  --config       JSON config ({{\"samplePercentage\":..,\"batchWindow\":..}})");
    println!();
    println!("Flags:");
    println!("  --json         Print the report as JSON");
    println!("  --clear        Remove the batch file after printing it");
    println!("  -V, --version  Print version information");
    println!("  -h, --help     Print this help message");
}

fn load_config(path: Option<&String>) -> Result<ReaperConfig> {
    let Some(path) = path else {
        return Ok(ReaperConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path))?;
    Ok(ReaperConfig::from_dictionary(&json)?)
}

fn run(args: &[String]) -> Result<()> {
    let Some(batch_path) = args.get(1) else {
        bail!("{}", USAGE);
    };
    if batch_path.starts_with("--") {
        bail!("batch-file '{}' looks like a flag, not a path\n{}", batch_path, USAGE);
    }

    let json_output = args.iter().any(|a| a == "--json");
    let clear = args.iter().any(|a| a == "--clear");
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .map(|i| args.get(i + 1).context("--config needs a file argument"))
        .transpose()?;

    let config = load_config(config_path)?;
    let store = BatchStore::new(PathBuf::from(batch_path));
    let batch = store
        .try_load()
        .with_context(|| format!("reading batch {}", batch_path))?
        .with_context(|| format!("no batch at {}", batch_path))?;

    let now = SystemTime::now();
    let report = BatchReport {
        path: batch_path.clone(),
        started_at_ms: batch
            .started_at()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64,
        elapsed_secs: batch.elapsed_at(now).as_secs(),
        batch_window_secs: config.batch_window.as_secs(),
        window_elapsed: !batch.should_keep_batching_at(&config, now),
        types: batch.all_types(),
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("batch:    {}", report.path);
        println!("started:  {} ms since epoch", report.started_at_ms);
        println!(
            "window:   {}s of {}s{}",
            report.elapsed_secs,
            report.batch_window_secs,
            if report.window_elapsed { " (elapsed)" } else { "" }
        );
        println!("types:    {}", report.types.len());
        for name in &report.types {
            println!("  {}", name);
        }
    }

    if clear {
        store.clear_from_disk()?;
        tracing::info!(path = %batch_path, "batch cleared");
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("reaper-batch {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return;
    }

    if let Err(e) = run(&args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
