// src/monitor/sources/ecosystem_feed.rs
//! Qualitative context: a feed of recent ecosystem posts that an external job
//! drops into the data directory before the cycle runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::path::PathBuf;

use crate::monitor::types::{DataSource, SourceKind};

const MAX_AGE_CAP_SECS: u64 = 365 * 24 * 3600;

pub struct EcosystemFeedSource {
    path: PathBuf,
    max_age: Duration,
}

impl EcosystemFeedSource {
    pub fn new(path: impl Into<PathBuf>, max_age_secs: u64) -> Self {
        Self {
            path: path.into(),
            max_age: Duration::seconds(max_age_secs.min(MAX_AGE_CAP_SECS) as i64),
        }
    }

    fn check(feed: Value, now: DateTime<Utc>, max_age: Duration) -> Result<Value> {
        if let Some(ts) = feed.get("fetchedAt").and_then(Value::as_str) {
            let fetched = DateTime::parse_from_rfc3339(ts)
                .with_context(|| format!("feed fetchedAt is not RFC 3339: {ts}"))?
                .with_timezone(&Utc);
            let age = now.signed_duration_since(fetched);
            if age > max_age {
                anyhow::bail!(
                    "feed too old ({:.1}h)",
                    age.num_seconds() as f64 / 3600.0
                );
            }
        }
        let count = feed
            .get("tweets")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        if count == 0 {
            anyhow::bail!("empty feed");
        }
        Ok(feed)
    }
}

#[async_trait]
impl DataSource for EcosystemFeedSource {
    fn name(&self) -> &'static str {
        "ecosystem"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Auxiliary
    }

    async fn fetch(&self) -> Result<Value> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                anyhow::bail!("no feed file at {}", self.path.display())
            }
            Err(e) => return Err(e).context("reading ecosystem feed"),
        };
        let feed: Value = serde_json::from_str(&text).context("parsing ecosystem feed")?;
        Self::check(feed, Utc::now(), self.max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stale_feed_is_rejected() {
        let now = Utc::now();
        let feed = json!({
            "fetchedAt": (now - Duration::hours(6)).to_rfc3339(),
            "tweets": [{ "text": "gm" }]
        });
        let err = EcosystemFeedSource::check(feed, now, Duration::hours(5)).unwrap_err();
        assert!(err.to_string().starts_with("feed too old"));
    }

    #[test]
    fn fresh_non_empty_feed_passes_through() {
        let now = Utc::now();
        let feed = json!({
            "fetchedAt": (now - Duration::minutes(30)).to_rfc3339(),
            "tweets": [{ "text": "builders shipping" }]
        });
        let out = EcosystemFeedSource::check(feed.clone(), now, Duration::hours(5)).unwrap();
        assert_eq!(out, feed);
    }

    #[test]
    fn empty_feed_is_rejected() {
        let err =
            EcosystemFeedSource::check(json!({ "tweets": [] }), Utc::now(), Duration::hours(5))
                .unwrap_err();
        assert_eq!(err.to_string(), "empty feed");
    }

    #[tokio::test]
    async fn missing_file_fails_as_auxiliary() {
        let tmp = tempfile::tempdir().unwrap();
        let src = EcosystemFeedSource::new(tmp.path().join("x-ecosystem-feed.json"), 18_000);
        assert_eq!(src.kind(), SourceKind::Auxiliary);
        let err = src.fetch().await.unwrap_err();
        assert!(err.to_string().starts_with("no feed file"));
    }
}
