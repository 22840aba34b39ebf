// src/monitor/store.rs
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::monitor::types::Snapshot;

/// Latest-snapshot file, overwritten every successful collection.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable snapshots count as "no history".
    pub async fn load(&self) -> Option<Snapshot> {
        let s = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(target: "monitor", path = %self.path.display(), "read snapshot: {e}");
                return None;
            }
        };
        match serde_json::from_str(&s) {
            Ok(snap) => Some(snap),
            Err(e) => {
                tracing::warn!(target: "monitor", path = %self.path.display(), "corrupt snapshot ignored: {e}");
                None
            }
        }
    }

    /// Write via temp file + rename so a crash never leaves a torn snapshot.
    pub async fn save(&self, snap: &Snapshot) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_vec_pretty(snap)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await
    }
}
