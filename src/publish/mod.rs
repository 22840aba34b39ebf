// src/publish/mod.rs
//! Delivery of composed text. Channels are tried in order; the first that
//! succeeds wins and the result says which one it was.

pub mod chart;
pub mod composer;
pub mod deferred;
pub mod oauth;
pub mod x_api;

use async_trait::async_trait;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use crate::publish::chart::{select_chart, ChartRenderer, ChartSpec, PngChartRenderer};
pub use crate::publish::composer::Composer;
pub use crate::publish::deferred::DeferredQueue;
pub use crate::publish::oauth::OAuthSigner;
pub use crate::publish::x_api::XApiPublisher;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "publish_attempts_total",
            "Publish attempts, by delivery method and outcome."
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    PrimaryApi,
    Deferred,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::PrimaryApi => "primary_api",
            DeliveryMethod::Deferred => "deferred",
        }
    }

    /// Whether a success on this channel means the text is actually public.
    pub fn is_live(&self) -> bool {
        matches!(self, DeliveryMethod::PrimaryApi)
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("channel not configured: {0}")]
    NotConfigured(&'static str),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("blocked by anti-automation: {0}")]
    Blocked(String),
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("pending queue io: {0}")]
    Io(#[from] std::io::Error),
}

impl PublishError {
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::NotConfigured(_) => "not_configured",
            PublishError::Timeout(_) => "timeout",
            PublishError::Blocked(_) => "blocked",
            PublishError::Rejected { .. } => "rejected",
            PublishError::Transport(_) => "transport",
            PublishError::Io(_) => "io",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub text: &'a str,
    pub media: Option<&'a Path>,
    pub reply_to: Option<&'a str>,
}

impl<'a> PublishRequest<'a> {
    pub fn text(text: &'a str) -> Self {
        Self {
            text,
            media: None,
            reply_to: None,
        }
    }
}

/// What a channel reports back when it accepted the text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delivery {
    pub post_id: Option<String>,
    pub url: Option<String>,
    pub pending_path: Option<PathBuf>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    fn method(&self) -> DeliveryMethod;

    /// `after` is the failure of the channel tried just before this one, if any.
    async fn publish(
        &self,
        req: &PublishRequest<'_>,
        after: Option<&PublishError>,
    ) -> Result<Delivery, PublishError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishFailure {
    pub kind: String,
    pub message: String,
}

impl From<&PublishError> for PublishFailure {
    fn from(e: &PublishError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    /// True only when the text went out on a live channel.
    pub success: bool,
    /// Channel that accepted the text; `None` when all of them failed.
    pub method: Option<DeliveryMethod>,
    pub attempted: Vec<DeliveryMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_path: Option<PathBuf>,
    /// Last failure seen along the way.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PublishFailure>,
    /// Copy of the text whenever it did not go out live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retained_text: Option<String>,
}

pub struct PublishStrategy {
    channels: Vec<Box<dyn Publisher>>,
    pending: Option<DeferredQueue>,
}

impl PublishStrategy {
    pub fn new(channels: Vec<Box<dyn Publisher>>) -> Self {
        Self {
            channels,
            pending: None,
        }
    }

    /// Clear this queue after any live success, so stale pending text is not posted twice.
    pub fn clearing_pending(mut self, queue: DeferredQueue) -> Self {
        self.pending = Some(queue);
        self
    }

    pub fn methods(&self) -> Vec<DeliveryMethod> {
        self.channels.iter().map(|c| c.method()).collect()
    }

    /// Never fails: the outcome, including total failure, is in the result.
    pub async fn publish(&self, req: &PublishRequest<'_>) -> PublishResult {
        ensure_metrics_described();
        let mut attempted = Vec::new();
        let mut last_err: Option<PublishError> = None;

        for channel in &self.channels {
            let method = channel.method();
            attempted.push(method);
            match channel.publish(req, last_err.as_ref()).await {
                Ok(delivery) => {
                    counter!("publish_attempts_total", "method" => method.as_str(), "outcome" => "ok")
                        .increment(1);
                    let live = method.is_live();
                    if live {
                        self.clear_pending().await;
                        tracing::info!(
                            target: "publish",
                            method = %method,
                            url = delivery.url.as_deref().unwrap_or_default(),
                            "published"
                        );
                    } else {
                        tracing::warn!(
                            target: "publish",
                            method = %method,
                            pending = ?delivery.pending_path,
                            "text deferred for out-of-band posting"
                        );
                    }
                    return PublishResult {
                        success: live,
                        method: Some(method),
                        attempted,
                        post_id: delivery.post_id,
                        url: delivery.url,
                        pending_path: delivery.pending_path,
                        error: last_err.as_ref().map(PublishFailure::from),
                        retained_text: (!live).then(|| req.text.to_string()),
                    };
                }
                Err(e) => {
                    counter!("publish_attempts_total", "method" => method.as_str(), "outcome" => e.kind())
                        .increment(1);
                    tracing::warn!(target: "publish", method = %method, kind = e.kind(), error = %e, "channel failed");
                    last_err = Some(e);
                }
            }
        }

        PublishResult {
            success: false,
            method: None,
            attempted,
            post_id: None,
            url: None,
            pending_path: None,
            error: Some(last_err.as_ref().map(PublishFailure::from).unwrap_or_else(|| {
                PublishFailure {
                    kind: "not_configured".into(),
                    message: "no publish channels configured".into(),
                }
            })),
            retained_text: Some(req.text.to_string()),
        }
    }

    async fn clear_pending(&self) {
        if let Some(q) = &self.pending {
            if let Err(e) = q.clear().await {
                tracing::warn!(target: "publish", error = %e, "could not clear pending post");
            }
        }
    }
}
