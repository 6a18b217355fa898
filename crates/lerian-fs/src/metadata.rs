//! File metadata snapshots and the tolerance-based metadata cache

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Point-in-time view of a filesystem entry.
///
/// `is_binary` and `hash` start empty and are filled in lazily by callers
/// that need them; [`MetadataCache`] carries those enrichments forward while
/// the entry stays valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub size: u64,
    pub mtime_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctime_ms: Option<i64>,
    pub mode: u32,
    pub is_directory: bool,
    pub is_file: bool,
    pub is_symlink: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_binary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl FileMetadata {
    /// Build a snapshot from `std::fs::Metadata`.
    ///
    /// `symlink` records whether the entry itself is a link; `meta` is
    /// normally the followed target.
    pub fn from_std(path: &Path, meta: &std::fs::Metadata, symlink: bool) -> Self {
        let extension = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|name| match name.rfind('.') {
                Some(0) | None => None,
                Some(idx) => Some(name[idx + 1..].to_lowercase()),
            });

        Self {
            size: meta.len(),
            mtime_ms: mtime_millis(meta),
            ctime_ms: ctime_millis(meta),
            mode: mode_bits(meta),
            is_directory: meta.is_dir(),
            is_file: meta.is_file(),
            is_symlink: symlink || meta.file_type().is_symlink(),
            is_binary: None,
            extension,
            hash: None,
        }
    }

    /// Whether `other` describes the same content version within `tolerance`.
    pub fn matches(&self, other: &FileMetadata, tolerance: Duration) -> bool {
        self.size == other.size
            && (self.mtime_ms - other.mtime_ms).unsigned_abs() <= tolerance.as_millis() as u64
    }
}

/// Milliseconds since the UNIX epoch, negative for pre-epoch times.
pub fn system_time_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Modification time in epoch milliseconds (0 when the platform lacks it).
pub fn mtime_millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified().map(system_time_millis).unwrap_or(0)
}

#[cfg(unix)]
fn ctime_millis(meta: &std::fs::Metadata) -> Option<i64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ctime() * 1000 + meta.ctime_nsec() / 1_000_000)
}

#[cfg(not(unix))]
fn ctime_millis(meta: &std::fs::Metadata) -> Option<i64> {
    meta.created().ok().map(system_time_millis)
}

#[cfg(unix)]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o666 }
}

/// Stat `path` within `timeout`, following symlinks.
///
/// A broken symlink is reported through the followed stat failing; the
/// caller sees [`Error::Metadata`] with the OS cause.
pub async fn read_metadata(path: &Path, timeout: Duration) -> Result<FileMetadata> {
    let work = async {
        let link = tokio::fs::symlink_metadata(path).await?;
        let is_link = link.file_type().is_symlink();
        let meta = if is_link {
            tokio::fs::metadata(path).await?
        } else {
            link
        };
        Ok::<_, std::io::Error>(FileMetadata::from_std(path, &meta, is_link))
    };

    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(meta)) => Ok(meta),
        Ok(Err(e)) => Err(Error::metadata(path, e)),
        Err(_) => Err(Error::metadata(
            path,
            format!("timed out after {}ms", timeout.as_millis()),
        )),
    }
}

/// Path-keyed cache of metadata snapshots.
///
/// An entry is served only while a fresh stat still agrees with it (same
/// size, mtime within `tolerance`), so callers always pay for one stat but
/// keep previously computed hashes and binary flags.
#[derive(Debug)]
pub struct MetadataCache {
    entries: Mutex<HashMap<PathBuf, FileMetadata>>,
    tolerance: Duration,
}

impl MetadataCache {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            tolerance,
        }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Merge `fresh` with any still-valid cached snapshot and store the result.
    pub fn refresh(&self, path: &Path, fresh: FileMetadata) -> FileMetadata {
        let Ok(mut entries) = self.entries.lock() else {
            return fresh;
        };
        let merged = match entries.get(path) {
            Some(cached) if cached.matches(&fresh, self.tolerance) => FileMetadata {
                hash: cached.hash.clone(),
                is_binary: cached.is_binary,
                ..fresh
            },
            _ => fresh,
        };
        entries.insert(path.to_path_buf(), merged.clone());
        merged
    }

    /// Cached snapshot, if any, without revalidation.
    pub fn get(&self, path: &Path) -> Option<FileMetadata> {
        self.entries.lock().ok()?.get(path).cloned()
    }

    /// Attach a digest to the cached snapshot for `path`.
    pub fn record_hash(&self, path: &Path, hex: &str) {
        if let Ok(mut entries) = self.entries.lock()
            && let Some(entry) = entries.get_mut(path)
        {
            entry.hash = Some(hex.to_string());
        }
    }

    /// Attach a binary classification to the cached snapshot for `path`.
    pub fn record_binary(&self, path: &Path, is_binary: bool) {
        if let Ok(mut entries) = self.entries.lock()
            && let Some(entry) = entries.get_mut(path)
        {
            entry.is_binary = Some(is_binary);
        }
    }

    pub fn invalidate(&self, path: &Path) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(path);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}
