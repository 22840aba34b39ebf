// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod analyze;
pub mod chain;
pub mod config;
pub mod ledger;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod publish;
pub mod run_log;
pub mod telemetry;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use crate::analyze::{InsightEngine, OpenRouterBackend, PromptPolicy};
use crate::chain::RpcClient;
use crate::config::AppConfig;
use crate::ledger::{LedgerRecorder, RpcRegistry};
use crate::monitor::{sources, SnapshotCollector, SnapshotStore};
use crate::publish::{
    Composer, DeferredQueue, PngChartRenderer, PublishStrategy, Publisher, XApiPublisher,
};
use crate::run_log::RunLog;

pub use crate::pipeline::{Pipeline, RunRecord, RunStatus};

/// Registry client for the configured contract and sender.
pub fn build_registry(cfg: &AppConfig) -> anyhow::Result<RpcRegistry> {
    let l = &cfg.ledger;
    let contract = l
        .contract_address
        .clone()
        .context("no registry contract address configured")?;
    // Read accessors need no sender; `AppConfig::validate` requires one for cycles.
    let from = l.from_address.clone().unwrap_or_default();
    let rpc = RpcClient::new(cfg.ledger_rpc_url(), cfg.http_timeout())
        .context("building ledger rpc client")?;
    Ok(RpcRegistry::new(rpc, contract, from)
        .with_event_topic(l.finding_event_topic.clone())
        .with_confirmation(
            Duration::from_secs(l.confirm_timeout_secs),
            Duration::from_millis(l.poll_interval_ms),
        ))
}

/// Wire every component from configuration. Each client is constructed once
/// here and handed to the components that need it.
pub fn build_pipeline(cfg: &AppConfig) -> anyhow::Result<Pipeline> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("onchain-analyst/", env!("CARGO_PKG_VERSION")))
        .timeout(cfg.http_timeout())
        .build()
        .context("building http client")?;
    let chain_rpc = RpcClient::new(&cfg.sources.rpc_url, cfg.http_timeout())
        .context("building chain rpc client")?;

    let collector = SnapshotCollector::new(
        sources::default_sources(cfg, http, chain_rpc),
        SnapshotStore::new(cfg.snapshot_path()),
    );

    let policy = PromptPolicy::load(cfg.insight.policy_path.as_deref())?;
    let backend = OpenRouterBackend::new(&cfg.insight).context("building reasoning backend")?;
    let engine = InsightEngine::new(Arc::new(backend), policy, cfg.insight.min_confidence);

    let pending = DeferredQueue::new(&cfg.data_dir);
    let mut channels: Vec<Box<dyn Publisher>> = vec![Box::new(XApiPublisher::new(&cfg.publish))];
    if cfg.publish.deferred_fallback {
        channels.push(Box::new(pending.clone()));
    }
    let publisher = PublishStrategy::new(channels).clearing_pending(pending);

    let recorder = LedgerRecorder::new(Arc::new(build_registry(cfg)?), cfg.ledger.summary_max_bytes);

    let pipeline = Pipeline::new(
        collector,
        engine,
        Composer::new(&cfg.compose),
        publisher,
        recorder,
        RunLog::new(cfg.run_log_path()),
    );
    Ok(if cfg.chart.enabled {
        pipeline.with_chart(Box::new(PngChartRenderer), cfg.chart_path())
    } else {
        pipeline
    })
}
