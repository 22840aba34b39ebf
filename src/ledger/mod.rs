// src/ledger/mod.rs
//! On-chain anchoring of accepted findings.
//!
//! The summary is bounded to the registry's field limit and the extended
//! analysis is reduced to a digest, so anyone holding the original text can
//! check that a registry entry matches it.

pub mod abi;
pub mod registry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use std::time::Duration;

use crate::analyze::{Category, Insight};
use crate::chain::RpcError;

pub use crate::ledger::abi::AbiError;
pub use crate::ledger::registry::RpcRegistry;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ledger_records_total",
            "Registry record attempts, by outcome."
        );
    });
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },
    #[error("transaction {tx_hash} not confirmed after {waited:?}")]
    ConfirmationTimeout { tx_hash: String, waited: Duration },
    #[error("decode: {0}")]
    Decode(String),
}

impl From<AbiError> for LedgerError {
    fn from(e: AbiError) -> Self {
        LedgerError::Decode(e.0)
    }
}

impl LedgerError {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Rpc(_) => "rpc",
            LedgerError::Reverted { .. } => "reverted",
            LedgerError::ConfirmationTimeout { .. } => "confirmation_timeout",
            LedgerError::Decode(_) => "decode",
        }
    }
}

/// Keccak-256 of the UTF-8 text, `0x`-prefixed lowercase hex.
pub fn content_hash(text: &str) -> String {
    format!("0x{}", hex::encode(content_digest(text)))
}

pub fn content_digest(text: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(text.as_bytes()));
    out
}

/// Longest prefix of `s` within `max_bytes` that ends on a char boundary.
pub fn bounded(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub category: Category,
    pub summary: String,
    pub full_analysis: Option<String>,
    /// Public reference to the published post, when there is one.
    pub reference: Option<String>,
}

impl Finding {
    pub fn from_insight(insight: &Insight, reference: Option<String>) -> Self {
        Self {
            category: insight.category,
            summary: insight.summary.clone(),
            full_analysis: Some(insight.full_analysis.clone()).filter(|a| !a.trim().is_empty()),
            reference: reference.filter(|r| !r.is_empty()),
        }
    }

    /// Text the content hash covers: the analysis, else the summary.
    pub fn hashed_text(&self) -> &str {
        self.full_analysis.as_deref().unwrap_or(&self.summary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    /// Registry-assigned id, or `"unknown"` when the event was not found.
    pub finding_id: String,
    pub contract_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub category: String,
    pub summary: String,
    pub content_hash: String,
    pub reference: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<abi::FindingTuple> for RegistryEntry {
    fn from(t: abi::FindingTuple) -> Self {
        Self {
            category: t.category,
            summary: t.summary,
            content_hash: format!("0x{}", hex::encode(t.content_hash)),
            reference: t.reference,
            timestamp: i64::try_from(t.timestamp)
                .ok()
                .and_then(|s| DateTime::from_timestamp(s, 0)),
        }
    }
}

/// Append-style registry of findings.
#[async_trait]
pub trait FindingRegistry: Send + Sync {
    fn address(&self) -> &str;

    /// Submit and wait for confirmation.
    async fn record_finding(
        &self,
        category: &str,
        summary: &str,
        content_hash: [u8; 32],
        reference: &str,
    ) -> Result<RecordReceipt, LedgerError>;

    async fn total_findings(&self) -> Result<u128, LedgerError>;

    async fn latest_findings(&self, n: u64) -> Result<Vec<RegistryEntry>, LedgerError>;
}

pub struct LedgerRecorder {
    registry: Arc<dyn FindingRegistry>,
    summary_max_bytes: usize,
}

impl LedgerRecorder {
    pub fn new(registry: Arc<dyn FindingRegistry>, summary_max_bytes: usize) -> Self {
        Self {
            registry,
            summary_max_bytes,
        }
    }

    pub fn registry(&self) -> &Arc<dyn FindingRegistry> {
        &self.registry
    }

    pub async fn record(&self, finding: &Finding) -> Result<RecordReceipt, LedgerError> {
        ensure_metrics_described();
        let digest = content_digest(finding.hashed_text());
        let summary = bounded(&finding.summary, self.summary_max_bytes);
        tracing::info!(
            target: "ledger",
            category = %finding.category,
            content_hash = %format!("0x{}", hex::encode(digest)),
            contract = self.registry.address(),
            "recording finding"
        );

        let res = self
            .registry
            .record_finding(
                finding.category.as_str(),
                summary,
                digest,
                finding.reference.as_deref().unwrap_or_default(),
            )
            .await;

        match &res {
            Ok(r) => {
                counter!("ledger_records_total", "outcome" => "ok").increment(1);
                tracing::info!(
                    target: "ledger",
                    tx = %r.tx_hash,
                    block = r.block_number,
                    finding_id = %r.finding_id,
                    "finding confirmed"
                );
            }
            Err(e) => {
                counter!("ledger_records_total", "outcome" => e.kind()).increment(1);
                tracing::warn!(target: "ledger", error = %e, "recording failed");
            }
        }
        res
    }
}
