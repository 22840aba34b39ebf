// src/monitor/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Core sources decide whether a cycle has data at all; auxiliary ones only add context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Core,
    Auxiliary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceFailure {
    pub error: String,
}

/// Per-source entry of a snapshot: the payload, or an `{error}` marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceResult {
    Failed(SourceFailure),
    Ok(Value),
}

impl SourceResult {
    pub fn failed(msg: impl Into<String>) -> Self {
        SourceResult::Failed(SourceFailure { error: msg.into() })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, SourceResult::Ok(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            SourceResult::Ok(v) => Some(v),
            SourceResult::Failed(_) => None,
        }
    }
}

/// Merged result of one collection cycle, keyed by source name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub sources: BTreeMap<String, SourceResult>,
}

impl Snapshot {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            sources: BTreeMap::new(),
        }
    }

    /// Successful payload of `source`, if it delivered one.
    pub fn payload(&self, source: &str) -> Option<&Value> {
        self.sources.get(source).and_then(SourceResult::payload)
    }
}

#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Key under which the result lands in the snapshot.
    fn name(&self) -> &'static str;
    fn kind(&self) -> SourceKind {
        SourceKind::Core
    }
    async fn fetch(&self) -> Result<Value>;
}
