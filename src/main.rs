//! onchain-analyst: run the collect -> analyze -> publish -> record cycle once,
//! on a timer, or inspect its run log and registry.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use onchain_analyst::config::AppConfig;
use onchain_analyst::ledger::FindingRegistry;
use onchain_analyst::metrics::Metrics;
use onchain_analyst::run_log::RunLog;
use onchain_analyst::{build_pipeline, build_registry, telemetry, Pipeline};

#[derive(Parser)]
#[command(name = "onchain-analyst", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one cycle (default).
    Run,
    /// Run cycles on a fixed interval; a tick that falls inside a running cycle is skipped.
    Watch {
        #[arg(long, default_value_t = 3600)]
        interval_secs: u64,
    },
    /// Summarize the run log.
    Health,
    /// Print the latest findings stored in the registry.
    Findings {
        #[arg(long, default_value_t = 5)]
        latest: u64,
    },
}

async fn cycle(pipeline: &Pipeline, metrics: &Metrics, cfg: &AppConfig) -> anyhow::Result<()> {
    let run = pipeline.run_cycle().await?;
    println!(
        "status: {}  duration: {:.1}s",
        run.status,
        run.duration_ms.unwrap_or_default() as f64 / 1000.0
    );
    if let Some(i) = &run.insight {
        println!("finding: {}", i.summary);
        println!("tx: {}", i.tx_hash);
    }
    if let Some(reason) = run.reason.as_ref().or(run.error.as_ref()) {
        println!("note: {reason}");
    }
    if let Err(e) = metrics.write_textfile(&cfg.metrics_path()).await {
        tracing::warn!(error = %e, "could not write metrics textfile");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let cfg = AppConfig::load().context("loading configuration")?;
            let metrics = Metrics::install()?;
            let pipeline = build_pipeline(&cfg)?;
            cycle(&pipeline, &metrics, &cfg).await?;
        }
        Command::Watch { interval_secs } => {
            let cfg = AppConfig::load().context("loading configuration")?;
            let metrics = Metrics::install()?;
            let pipeline = build_pipeline(&cfg)?;
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs, "watching");
            loop {
                tokio::select! {
                    _ = ticker.tick() => cycle(&pipeline, &metrics, &cfg).await?,
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutting down");
                        break;
                    }
                }
            }
        }
        Command::Health => {
            let cfg = AppConfig::resolve().context("loading configuration")?;
            let health = RunLog::new(cfg.run_log_path()).health().await?;
            print!("{health}");
        }
        Command::Findings { latest } => {
            let cfg = AppConfig::resolve().context("loading configuration")?;
            let registry = build_registry(&cfg)?;
            let total = registry.total_findings().await?;
            println!("registry {}: {total} finding(s)", registry.address());
            for f in registry.latest_findings(latest.min(u64::try_from(total).unwrap_or(u64::MAX))).await? {
                let at = f
                    .timestamp
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!("[{at}] {} | {}", f.category, f.summary);
                let reference = if f.reference.is_empty() { "-" } else { &f.reference };
                println!("    hash {}  ref {reference}", f.content_hash);
            }
        }
    }
    Ok(())
}
