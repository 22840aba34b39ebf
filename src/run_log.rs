// src/run_log.rs
//! Append-only run log, one JSON record per line, plus the health summary
//! an operator reads instead of per-cycle alerts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::pipeline::{RunRecord, RunStatus};

#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Existing lines are never touched.
    pub async fn append(&self, run: &RunRecord) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut line = serde_json::to_vec(run)?;
        line.push(b'\n');
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        f.write_all(&line).await?;
        f.flush().await
    }

    /// All readable records in order. Malformed lines are skipped with a warning.
    pub async fn read_all(&self) -> std::io::Result<Vec<RunRecord>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut out = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunRecord>(line) {
                Ok(r) => out.push(r),
                Err(e) => tracing::warn!(
                    target: "pipeline",
                    path = %self.path.display(),
                    line = i + 1,
                    error = %e,
                    "skipping malformed run record"
                ),
            }
        }
        Ok(out)
    }

    pub async fn health(&self) -> std::io::Result<RunHealth> {
        Ok(RunHealth::from_runs(&self.read_all().await?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestRun {
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub duration_ms: Option<u64>,
    pub summary: Option<String>,
    pub tx_hash: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHealth {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub error: usize,
    /// Fraction of all runs that ended in success, `0.0` for an empty log.
    pub success_rate: f64,
    pub avg_success_duration_ms: Option<f64>,
    pub posted: usize,
    pub deferred: usize,
    pub recorded: usize,
    pub latest: Option<LatestRun>,
}

impl RunHealth {
    pub fn from_runs(runs: &[RunRecord]) -> Self {
        let mut h = RunHealth {
            total: runs.len(),
            ..RunHealth::default()
        };
        let mut durations = Vec::new();
        for r in runs {
            match r.status {
                RunStatus::Success => {
                    h.success += 1;
                    durations.push(r.duration_ms.unwrap_or(0) as f64);
                }
                RunStatus::Skipped => h.skipped += 1,
                RunStatus::Error => h.error += 1,
                RunStatus::Running => {}
            }
            if let Some(p) = &r.steps.publish {
                if p.success {
                    h.posted += 1;
                } else if p.method.is_some_and(|m| !m.is_live()) {
                    h.deferred += 1;
                }
            }
            if r.steps.onchain.as_ref().is_some_and(|o| o.success) {
                h.recorded += 1;
            }
        }
        if h.total > 0 {
            h.success_rate = h.success as f64 / h.total as f64;
        }
        if !durations.is_empty() {
            h.avg_success_duration_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        h.latest = runs.last().map(|r| LatestRun {
            started_at: r.started_at,
            status: r.status,
            duration_ms: r.duration_ms,
            summary: r.insight.as_ref().map(|i| i.summary.clone()),
            tx_hash: r.insight.as_ref().map(|i| i.tx_hash.clone()),
            detail: r.reason.clone().or_else(|| r.error.clone()),
        });
        h
    }
}

impl fmt::Display for RunHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "runs:          {}", self.total)?;
        writeln!(
            f,
            "  success {} / skipped {} / error {}",
            self.success, self.skipped, self.error
        )?;
        writeln!(f, "success rate:  {:.0}%", self.success_rate * 100.0)?;
        match self.avg_success_duration_ms {
            Some(ms) => writeln!(f, "avg duration:  {:.1}s", ms / 1000.0)?,
            None => writeln!(f, "avg duration:  n/a")?,
        }
        writeln!(f, "posted:        {}", self.posted)?;
        writeln!(f, "deferred:      {}", self.deferred)?;
        writeln!(f, "recorded:      {}", self.recorded)?;
        if let Some(l) = &self.latest {
            writeln!(f, "latest:        {} {}", l.started_at.to_rfc3339(), l.status)?;
            if let Some(ms) = l.duration_ms {
                writeln!(f, "  duration {:.1}s", ms as f64 / 1000.0)?;
            }
            if let Some(s) = &l.summary {
                writeln!(f, "  insight  {s}")?;
            }
            if let Some(tx) = &l.tx_hash {
                writeln!(f, "  tx       {tx}")?;
            }
            if let Some(d) = &l.detail {
                writeln!(f, "  note     {d}")?;
            }
        }
        Ok(())
    }
}
