// src/monitor/mod.rs
//! Snapshot collection: every source is dispatched at once, every result is
//! inspected on its own, and the merged snapshot is persisted before returning.

pub mod sources;
pub mod store;
pub mod types;

use std::panic::AssertUnwindSafe;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use metrics::{counter, describe_counter, describe_gauge};
use once_cell::sync::OnceCell;
use serde_json::Value;

pub use crate::monitor::store::SnapshotStore;
pub use crate::monitor::types::{DataSource, Snapshot, SourceKind, SourceResult};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "monitor_source_errors_total",
            "Data source fetch failures, by source."
        );
        describe_gauge!(
            "monitor_core_sources_ok",
            "Core sources that delivered data in the last collection."
        );
    });
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("all core data sources failed ({})", summarize(.failures))]
    AllCoreSourcesFailed { failures: Vec<(String, String)> },
    #[error("persisting snapshot: {0}")]
    Store(#[from] std::io::Error),
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Per-kind tally of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub core_ok: usize,
    pub core_total: usize,
    pub auxiliary_ok: usize,
    pub auxiliary_total: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Collected {
    pub current: Snapshot,
    /// Snapshot that was on disk before this cycle wrote its own; `None` on first run.
    pub previous: Option<Snapshot>,
    pub report: CollectReport,
}

pub struct SnapshotCollector {
    sources: Vec<Box<dyn DataSource>>,
    store: SnapshotStore,
}

impl SnapshotCollector {
    pub fn new(sources: Vec<Box<dyn DataSource>>, store: SnapshotStore) -> Self {
        Self { sources, store }
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub async fn collect(&self) -> Result<Collected, CollectError> {
        ensure_metrics_described();

        // Launch all, join all: a slow or failing source never cancels its siblings.
        let settled = join_all(self.sources.iter().map(|s| settle(s.as_ref()))).await;

        let mut current = Snapshot::new(Utc::now());
        let mut report = CollectReport::default();
        let mut core_failures = Vec::new();

        for (source, outcome) in self.sources.iter().zip(settled) {
            let kind = source.kind();
            match kind {
                SourceKind::Core => report.core_total += 1,
                SourceKind::Auxiliary => report.auxiliary_total += 1,
            }
            let entry = match outcome {
                Ok(payload) => {
                    match kind {
                        SourceKind::Core => report.core_ok += 1,
                        SourceKind::Auxiliary => report.auxiliary_ok += 1,
                    }
                    SourceResult::Ok(payload)
                }
                Err(e) => {
                    let msg = format!("{e:#}");
                    tracing::warn!(target: "monitor", source = source.name(), ?kind, "source failed: {msg}");
                    counter!("monitor_source_errors_total", "source" => source.name())
                        .increment(1);
                    report.failed.push(source.name().to_string());
                    if kind == SourceKind::Core {
                        core_failures.push((source.name().to_string(), msg.clone()));
                    }
                    SourceResult::failed(msg)
                }
            };
            current.sources.insert(source.name().to_string(), entry);
        }

        metrics::gauge!("monitor_core_sources_ok").set(report.core_ok as f64);
        tracing::info!(
            target: "monitor",
            core_ok = report.core_ok,
            core_total = report.core_total,
            auxiliary_ok = report.auxiliary_ok,
            auxiliary_total = report.auxiliary_total,
            "snapshot collected"
        );

        if report.core_ok == 0 {
            return Err(CollectError::AllCoreSourcesFailed {
                failures: core_failures,
            });
        }

        let previous = self.store.load().await;
        self.store.save(&current).await?;

        Ok(Collected {
            current,
            previous,
            report,
        })
    }
}

/// Run one fetch to completion; a panic inside the source counts as its failure.
async fn settle(source: &dyn DataSource) -> anyhow::Result<Value> {
    match AssertUnwindSafe(source.fetch()).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("source {} panicked", source.name())),
    }
}
