// src/publish/deferred.rs
//! File-based pending queue: the text is parked on disk for manual or
//! assisted posting when the live channel is out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::publish::{Delivery, DeliveryMethod, PublishError, PublishRequest, Publisher};

pub const PENDING_TEXT_FILE: &str = "pending-post.txt";
pub const PENDING_META_FILE: &str = "pending-post.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPost {
    pub text: String,
    pub media_path: Option<PathBuf>,
    pub reply_to: Option<String>,
    pub saved_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct DeferredQueue {
    dir: PathBuf,
}

impl DeferredQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn text_path(&self) -> PathBuf {
        self.dir.join(PENDING_TEXT_FILE)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(PENDING_META_FILE)
    }

    /// Overwrites any earlier pending post.
    pub async fn save(&self, req: &PublishRequest<'_>, reason: &str) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let pending = PendingPost {
            text: req.text.to_string(),
            media_path: req.media.map(Path::to_path_buf),
            reply_to: req.reply_to.map(str::to_string),
            saved_at: Utc::now(),
            reason: reason.to_string(),
        };
        let meta = serde_json::to_vec_pretty(&pending)?;
        write_atomic(&self.meta_path(), &meta).await?;
        let text_path = self.text_path();
        write_atomic(&text_path, req.text.as_bytes()).await?;
        Ok(text_path)
    }

    pub async fn load(&self) -> Option<PendingPost> {
        let bytes = tokio::fs::read(self.meta_path()).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub async fn clear(&self) -> std::io::Result<()> {
        for p in [self.text_path(), self.meta_path()] {
            match tokio::fs::remove_file(&p).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl Publisher for DeferredQueue {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Deferred
    }

    async fn publish(
        &self,
        req: &PublishRequest<'_>,
        after: Option<&PublishError>,
    ) -> Result<Delivery, PublishError> {
        let reason = after
            .map(|e| e.to_string())
            .unwrap_or_else(|| "primary channel unavailable".to_string());
        let path = self.save(req, &reason).await?;
        Ok(Delivery {
            post_id: None,
            url: None,
            pending_path: Some(path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn save_writes_text_and_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let q = DeferredQueue::new(tmp.path().join("data"));
        let media = PathBuf::from("/tmp/post-chart.png");
        let req = PublishRequest {
            text: "usdc supply on base +4%",
            media: Some(&media),
            reply_to: Some("1799"),
        };
        let err = PublishError::Timeout(Duration::from_secs(15));
        let delivery = q.publish(&req, Some(&err)).await.unwrap();

        assert_eq!(delivery.pending_path, Some(q.text_path()));
        assert_eq!(
            std::fs::read_to_string(q.text_path()).unwrap(),
            "usdc supply on base +4%"
        );
        let meta = q.load().await.unwrap();
        assert_eq!(meta.media_path, Some(media));
        assert_eq!(meta.reply_to.as_deref(), Some("1799"));
        assert!(meta.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let q = DeferredQueue::new(tmp.path());
        q.clear().await.unwrap();
        q.save(&PublishRequest::text("x"), "r").await.unwrap();
        q.clear().await.unwrap();
        assert!(q.load().await.is_none());
        assert!(!q.text_path().exists());
    }
}
