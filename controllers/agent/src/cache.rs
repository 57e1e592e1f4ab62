//! On-disk copy of the last good NodeNetworkConfig.
//!
//! Survives agent restarts so a failed apply can always be rolled back to
//! what the node was running before.

use crate::error::AgentError;
use crds::NodeNetworkConfig;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const FILE_MODE: u32 = 0o600;

/// JSON file holding one NodeNetworkConfig.
#[derive(Debug, Clone)]
pub struct ConfigCache {
    path: PathBuf,
}

impl ConfigCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the cached config; `None` when nothing was cached yet.
    pub async fn load(&self) -> Result<Option<NodeNetworkConfig>, AgentError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error("reading", &e)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| self.error("parsing", &e))
    }

    /// Replaces the cached config.
    ///
    /// Written to a sibling file first and renamed over the old one, so a
    /// crash never leaves a truncated cache behind.
    pub async fn store(&self, config: &NodeNetworkConfig) -> Result<(), AgentError> {
        let payload = serde_json::to_vec_pretty(config).map_err(|e| self.error("encoding", &e))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(&tmp)
            .await
            .map_err(|e| self.error("creating", &e))?;
        file.write_all(&payload)
            .await
            .map_err(|e| self.error("writing", &e))?;
        file.sync_all()
            .await
            .map_err(|e| self.error("syncing", &e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.error("replacing", &e))
    }

    fn error(&self, action: &str, err: &dyn std::fmt::Display) -> AgentError {
        AgentError::Cache(format!("{action} {}: {err}", self.path.display()))
    }
}
