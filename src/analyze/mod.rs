// src/analyze/mod.rs
//! Insight generation: snapshot pair in, validated insight out, then the
//! confidence gate that decides whether the cycle publishes at all.

pub mod backend;
pub mod insight;
pub mod policy;

use std::sync::Arc;

use crate::monitor::Snapshot;

pub use crate::analyze::backend::{OpenRouterBackend, ReasoningBackend};
pub use crate::analyze::insight::{parse_insight, Category, Insight, InsightError};
pub use crate::analyze::policy::PromptPolicy;

pub const DEFAULT_MIN_CONFIDENCE: f64 = 7.0;

/// Outcome of the gate. Falling below the threshold is a quality filter, not a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum Gated {
    Accepted(Insight),
    BelowThreshold { insight: Insight, threshold: f64 },
}

impl Gated {
    pub fn accepted(self) -> Option<Insight> {
        match self {
            Gated::Accepted(i) => Some(i),
            Gated::BelowThreshold { .. } => None,
        }
    }
}

pub struct InsightEngine {
    backend: Arc<dyn ReasoningBackend>,
    policy: PromptPolicy,
    min_confidence: f64,
}

impl InsightEngine {
    pub fn new(backend: Arc<dyn ReasoningBackend>, policy: PromptPolicy, min_confidence: f64) -> Self {
        Self {
            backend,
            policy,
            min_confidence,
        }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    /// Ask the backend and validate its reply. Never returns an out-of-range confidence.
    pub async fn generate(
        &self,
        current: &Snapshot,
        previous: Option<&Snapshot>,
    ) -> Result<Insight, InsightError> {
        let user = self
            .policy
            .user_message(current, previous)
            .map_err(|e| InsightError::MalformedResponse(format!("serializing snapshot: {e}")))?;
        let raw = self.backend.complete(&self.policy.system, &user).await?;
        let insight = parse_insight(&raw)?;
        tracing::info!(
            target: "analyze",
            backend = self.backend.name(),
            category = %insight.category,
            confidence = insight.confidence,
            summary = %insight.summary,
            "insight generated"
        );
        Ok(insight)
    }

    /// `generate` followed by the confidence gate.
    pub async fn analyze(
        &self,
        current: &Snapshot,
        previous: Option<&Snapshot>,
    ) -> Result<Gated, InsightError> {
        let insight = self.generate(current, previous).await?;
        Ok(self.gate(insight))
    }

    pub fn gate(&self, insight: Insight) -> Gated {
        if insight.confidence < self.min_confidence {
            tracing::info!(
                target: "analyze",
                confidence = insight.confidence,
                threshold = self.min_confidence,
                "insight below confidence threshold"
            );
            Gated::BelowThreshold {
                insight,
                threshold: self.min_confidence,
            }
        } else {
            Gated::Accepted(insight)
        }
    }
}
