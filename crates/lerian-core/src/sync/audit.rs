//! Append-only NDJSON audit log
//!
//! Writing never fails a sync: errors are logged at warn level and dropped.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use lerian_fs::SyncPath;

/// Default size past which the log is rotated (10 MiB).
pub const DEFAULT_AUDIT_MAX_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub details: Value,
    pub result: AuditResult,
    pub session_id: String,
    pub user: String,
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    max_bytes: u64,
    session_id: String,
    user: String,
    enabled: bool,
}

impl AuditLog {
    /// Log at the standard location under `destination`.
    pub fn for_destination(destination: &Path, session_id: impl Into<String>, max_bytes: u64) -> Self {
        Self::new(destination.join(SyncPath::AuditLog), session_id, max_bytes)
    }

    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>, max_bytes: u64) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            path: path.into(),
            max_bytes,
            session_id: session_id.into(),
            user,
            enabled: true,
        }
    }

    /// A log that records nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(PathBuf::new(), String::new(), DEFAULT_AUDIT_MAX_BYTES)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn record(&self, operation: &str, details: Value, result: AuditResult) {
        if !self.enabled {
            return;
        }
        let entry = AuditEntry {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            details,
            result,
            session_id: self.session_id.clone(),
            user: self.user.clone(),
            pid: std::process::id(),
        };
        if let Err(e) = self.append(&entry).await {
            tracing::warn!(path = %self.path.display(), operation, error = %e, "Failed to write audit entry");
        }
    }

    async fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.rotate_if_needed().await?;

        let mut line = serde_json::to_vec(entry).map_err(std::io::Error::other)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }

    async fn rotate_if_needed(&self) -> std::io::Result<()> {
        let size = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if size < self.max_bytes {
            return Ok(());
        }
        let suffix = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
        let mut rotated = self.path.clone().into_os_string();
        rotated.push(format!(".{suffix}"));
        tokio::fs::rename(&self.path, &rotated).await?;
        tracing::info!(path = %self.path.display(), size, "Rotated audit log");
        Ok(())
    }
}

/// Parse every entry of an audit log file, skipping malformed lines.
pub fn read_entries(path: &Path) -> std::io::Result<Vec<AuditEntry>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
