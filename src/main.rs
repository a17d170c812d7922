//! biodata-growth: batch entrypoint.
//! Runs the registered collectors and publishes the merged JSON store, or
//! re-validates what is already published.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use biodata_growth::collect::registry;
use biodata_growth::config::CollectConfig;
use biodata_growth::metrics::Metrics;
use biodata_growth::pipeline::SourceStatus;
use biodata_growth::store::DataStore;
use biodata_growth::validate::audit_store;
use biodata_growth::Pipeline;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "biodata-growth", version, about = "Collect growth statistics of public biological databases")]
struct Cli {
    /// Config file (TOML). Defaults to config/collect.toml when present.
    #[arg(long, global = true, env = "COLLECT_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run collectors, merge with published history and rewrite the manifest.
    Run {
        /// Only run these sources (repeatable).
        #[arg(long = "only", value_name = "SOURCE")]
        only: Vec<String>,
    },
    /// Re-check every published data file and the manifest.
    Validate,
}

/// Compact logs by default, JSON lines with LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("biodata_growth=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let subscriber = tracing_subscriber::registry().with(filter);
    if json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // .env is optional (local runs).
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = CollectConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run { only: Vec::new() }) {
        Command::Run { only } => run(&cfg, &only).await,
        Command::Validate => validate(&cfg),
    }
}

async fn run(cfg: &CollectConfig, only: &[String]) -> anyhow::Result<ExitCode> {
    let metrics = match &cfg.metrics_textfile {
        Some(_) => Some(Metrics::install()?),
        None => None,
    };

    let collectors = registry::select(cfg, only)?;
    let pipeline = Pipeline::from_config(cfg, chrono::Utc::now()).context("building http client")?;
    let report = pipeline.run(&collectors).await.context("writing manifest")?;

    for s in &report.sources {
        match &s.status {
            SourceStatus::Updated { path, points, .. } => {
                println!("[{}] ok: {points} points -> {}", s.source_id, path.display());
            }
            SourceStatus::Retained { conflict, .. } => println!("[{}] kept: {conflict}", s.source_id),
            SourceStatus::Failed(e) => println!("[{}] error ({}): {e}", s.source_id, e.kind()),
        }
    }
    println!(
        "sources: {} ok, {} failed; manifest lists {}",
        report.succeeded(),
        report.sources.len() - report.succeeded(),
        report.manifest.sources.len()
    );

    if let (Some(m), Some(path)) = (&metrics, &cfg.metrics_textfile) {
        if let Err(e) = m.write_textfile(path) {
            tracing::warn!(error = %e, "metrics textfile not written");
        }
    }

    match report.failure(|id| cfg.is_critical(id)) {
        Some(reason) => {
            tracing::error!(%reason, "run failed");
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

fn validate(cfg: &CollectConfig) -> anyhow::Result<ExitCode> {
    let store = DataStore::new(&cfg.data_dir);
    let audit = audit_store(&store, cfg.drift_tolerance)
        .with_context(|| format!("auditing {}", cfg.data_dir.display()))?;

    if audit.files.is_empty() {
        println!("no data files found in {}", cfg.data_dir.display());
    }
    for f in &audit.files {
        let name = f.path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if f.problems.is_empty() {
            println!("{name}: valid");
        }
        for p in &f.problems {
            println!("{name}: {p}");
        }
        for w in &f.warnings {
            println!("{name}: warning: {w}");
        }
    }
    for p in &audit.manifest_problems {
        println!("manifest.json: {p}");
    }

    Ok(if audit.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
