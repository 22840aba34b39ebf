// src/pipeline.rs
//! Run orchestrator: collect -> analyze -> compose -> publish -> record, one
//! cycle at a time, with exactly one run record appended per cycle.

use anyhow::Context;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::analyze::{Category, Gated, Insight, InsightEngine, InsightError};
use crate::ledger::{Finding, LedgerError, LedgerRecorder, RecordReceipt};
use crate::monitor::{CollectError, CollectReport, Snapshot, SnapshotCollector};
use crate::publish::{
    select_chart, ChartRenderer, Composer, DeliveryMethod, PublishRequest, PublishResult,
    PublishStrategy,
};
use crate::run_log::RunLog;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Completed cycles, by terminal status.");
        describe_histogram!("pipeline_run_duration_ms", "Cycle wall-clock duration in ms.");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Skipped,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Skipped => "skipped",
            RunStatus::Error => "error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitorStep {
    pub success: bool,
    pub core_ok: usize,
    pub core_total: usize,
    pub auxiliary_ok: usize,
    pub auxiliary_total: usize,
    pub failed_sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MonitorStep {
    fn from_report(r: &CollectReport) -> Self {
        Self {
            success: true,
            core_ok: r.core_ok,
            core_total: r.core_total,
            auxiliary_ok: r.auxiliary_ok,
            auxiliary_total: r.auxiliary_total,
            failed_sources: r.failed.clone(),
            error: None,
        }
    }

    fn failed(e: &CollectError) -> Self {
        let failed_sources = match e {
            CollectError::AllCoreSourcesFailed { failures } => {
                failures.iter().map(|(name, _)| name.clone()).collect()
            }
            CollectError::Store(_) => Vec::new(),
        };
        Self {
            success: false,
            failed_sources,
            error: Some(e.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalyzeStep {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComposeStep {
    pub success: bool,
    pub length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChartStep {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OnchainStep {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OnchainStep {
    fn confirmed(r: &RecordReceipt) -> Self {
        Self {
            success: true,
            tx_hash: Some(r.tx_hash.clone()),
            block_number: Some(r.block_number),
            finding_id: Some(r.finding_id.clone()),
            contract_address: Some(r.contract_address.clone()),
            error: None,
        }
    }

    fn failed(e: &LedgerError) -> Self {
        Self {
            success: false,
            error: Some(e.to_string()),
            ..Self::default()
        }
    }
}

/// One entry per component invoked in the cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Steps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyze: Option<AnalyzeStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<ComposeStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onchain: Option<OnchainStep>,
}

impl Steps {
    pub fn names(&self) -> Vec<&'static str> {
        [
            ("monitor", self.monitor.is_some()),
            ("analyze", self.analyze.is_some()),
            ("compose", self.compose.is_some()),
            ("chart", self.chart.is_some()),
            ("publish", self.publish.is_some()),
            ("onchain", self.onchain.is_some()),
        ]
        .into_iter()
        .filter_map(|(n, present)| present.then_some(n))
        .collect()
    }
}

/// Condensed view of an accepted insight with its delivery and ledger references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInsight {
    pub category: Category,
    pub summary: String,
    pub tweet_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tweet_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_method: Option<DeliveryMethod>,
    pub tx_hash: String,
    pub finding_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(default)]
    pub steps: Steps,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insight: Option<RunInsight>,
}

impl RunRecord {
    pub fn start(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at,
            status: RunStatus::Running,
            steps: Steps::default(),
            reason: None,
            error: None,
            completed_at: None,
            duration_ms: None,
            insight: None,
        }
    }
}

/// A step failure that ends the cycle in `error`.
#[derive(Debug, thiserror::Error)]
enum CycleFault {
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Insight(#[from] InsightError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

struct ChartStage {
    renderer: Arc<dyn ChartRenderer>,
    path: PathBuf,
}

pub struct Pipeline {
    collector: SnapshotCollector,
    engine: InsightEngine,
    composer: Composer,
    publisher: PublishStrategy,
    recorder: LedgerRecorder,
    run_log: RunLog,
    chart: Option<ChartStage>,
}

impl Pipeline {
    pub fn new(
        collector: SnapshotCollector,
        engine: InsightEngine,
        composer: Composer,
        publisher: PublishStrategy,
        recorder: LedgerRecorder,
        run_log: RunLog,
    ) -> Self {
        Self {
            collector,
            engine,
            composer,
            publisher,
            recorder,
            run_log,
            chart: None,
        }
    }

    pub fn with_chart(mut self, renderer: Box<dyn ChartRenderer>, path: impl Into<PathBuf>) -> Self {
        self.chart = Some(ChartStage {
            renderer: Arc::from(renderer),
            path: path.into(),
        });
        self
    }

    pub fn run_log(&self) -> &RunLog {
        &self.run_log
    }

    /// Run one cycle to a terminal status and append its record.
    ///
    /// Component failures end up in the record, not in the `Err` branch; an
    /// `Err` here means the run log itself could not be written.
    pub async fn run_cycle(&self) -> anyhow::Result<RunRecord> {
        ensure_metrics_described();
        let started = Instant::now();
        let mut run = RunRecord::start(Utc::now());
        tracing::info!(target: "pipeline", started_at = %run.started_at, "cycle start");

        if let Err(fault) = self.steps(&mut run).await {
            tracing::error!(target: "pipeline", error = %fault, "cycle failed");
            run.status = RunStatus::Error;
            run.error = Some(fault.to_string());
        }

        let elapsed = started.elapsed();
        run.completed_at = Some(Utc::now());
        run.duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));

        counter!("pipeline_runs_total", "status" => run.status.as_str()).increment(1);
        histogram!("pipeline_run_duration_ms").record(elapsed.as_secs_f64() * 1000.0);

        self.run_log
            .append(&run)
            .await
            .with_context(|| format!("appending run record to {}", self.run_log.path().display()))?;

        tracing::info!(
            target: "pipeline",
            status = %run.status,
            duration_ms = run.duration_ms.unwrap_or_default(),
            steps = ?run.steps.names(),
            "cycle complete"
        );
        Ok(run)
    }

    async fn steps(&self, run: &mut RunRecord) -> Result<(), CycleFault> {
        let collected = match self.collector.collect().await {
            Ok(c) => c,
            Err(e) => {
                run.steps.monitor = Some(MonitorStep::failed(&e));
                return Err(e.into());
            }
        };
        run.steps.monitor = Some(MonitorStep::from_report(&collected.report));

        let gated = match self
            .engine
            .analyze(&collected.current, collected.previous.as_ref())
            .await
        {
            Ok(g) => g,
            Err(e) => {
                run.steps.analyze = Some(AnalyzeStep {
                    success: false,
                    error: Some(e.to_string()),
                    ..AnalyzeStep::default()
                });
                return Err(e.into());
            }
        };
        let insight = match gated {
            Gated::Accepted(i) => i,
            Gated::BelowThreshold { insight, threshold } => {
                run.status = RunStatus::Skipped;
                run.reason = Some(format!(
                    "confidence {} below threshold {threshold}",
                    insight.confidence
                ));
                tracing::info!(target: "pipeline", reason = run.reason.as_deref().unwrap_or_default(), "cycle skipped");
                return Ok(());
            }
        };
        run.steps.analyze = Some(AnalyzeStep {
            success: true,
            category: Some(insight.category),
            confidence: Some(insight.confidence),
            error: None,
        });

        let text = self.composer.compose(&insight.tweet_draft);
        run.steps.compose = Some(ComposeStep {
            success: true,
            length: text.chars().count(),
        });

        let chart_path = self.chart(&insight, &collected.current, run).await;

        let published = self
            .publisher
            .publish(&PublishRequest {
                text: &text,
                media: chart_path.as_deref(),
                reply_to: None,
            })
            .await;
        run.steps.publish = Some(published.clone());

        // Recorded regardless of delivery: the analysis stands on its own.
        let finding = Finding::from_insight(&insight, published.url.clone());
        let receipt = match self.recorder.record(&finding).await {
            Ok(r) => r,
            Err(e) => {
                run.steps.onchain = Some(OnchainStep::failed(&e));
                return Err(e.into());
            }
        };
        run.steps.onchain = Some(OnchainStep::confirmed(&receipt));

        run.insight = Some(RunInsight {
            category: insight.category,
            summary: insight.summary.clone(),
            tweet_text: text,
            tweet_url: published.url,
            publish_method: published.method,
            tx_hash: receipt.tx_hash,
            finding_id: receipt.finding_id,
        });
        run.status = RunStatus::Success;
        Ok(())
    }

    /// Never fails the cycle; a chart is a nice-to-have.
    async fn chart(
        &self,
        insight: &Insight,
        snapshot: &Snapshot,
        run: &mut RunRecord,
    ) -> Option<PathBuf> {
        let stage = self.chart.as_ref()?;
        let Some(spec) = select_chart(insight.category, snapshot) else {
            tracing::debug!(target: "pipeline", category = %insight.category, "no chartable data");
            run.steps.chart = Some(ChartStep::default());
            return None;
        };
        // PNG encoding and the file write block; keep them off the runtime workers.
        let renderer = Arc::clone(&stage.renderer);
        let out = stage.path.clone();
        let rendered = tokio::task::spawn_blocking(move || renderer.render(&spec, &out))
            .await
            .unwrap_or_else(|e| Err(anyhow::anyhow!("chart task failed: {e}")));
        match rendered {
            Ok(()) => {
                run.steps.chart = Some(ChartStep {
                    success: true,
                    path: Some(stage.path.clone()),
                    error: None,
                });
                Some(stage.path.clone())
            }
            Err(e) => {
                tracing::warn!(target: "pipeline", error = %format!("{e:#}"), "chart generation failed");
                run.steps.chart = Some(ChartStep {
                    success: false,
                    path: None,
                    error: Some(format!("{e:#}")),
                });
                None
            }
        }
    }
}
