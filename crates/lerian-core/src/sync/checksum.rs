//! Persisted digest cache for source files
//!
//! Keys embed the metadata that justified trusting a digest
//! (`<relativePath>:<mtimeMillis>:<sizeBytes>`), so a changed file simply
//! misses. Only one key per path is retained.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use lerian_fs::io::{RobustnessConfig, write_atomic};

use crate::Result;

#[derive(Debug, Clone, Default)]
pub struct ChecksumCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    /// Relative path to its current key in `entries`
    index: HashMap<String, String>,
    dirty: bool,
}

impl ChecksumCache {
    pub fn key(relative: &str, mtime_ms: i64, size: u64) -> String {
        format!("{relative}:{mtime_ms}:{size}")
    }

    /// Load the cache file at `path`.
    ///
    /// A missing file yields an empty cache. A corrupted one is logged and
    /// replaced by an empty cache on the next save.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Checksum cache is corrupted, starting cold");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Checksum cache unreadable, starting cold");
                BTreeMap::new()
            }
        };
        let mut cache = Self {
            path,
            ..Default::default()
        };
        for (key, digest) in entries {
            match key_path(&key) {
                Some(relative) => {
                    let relative = relative.to_string();
                    cache.put(relative, key, digest);
                }
                None => tracing::debug!(key = %key, "Dropping malformed checksum cache key"),
            }
        }
        cache
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, relative: &str, mtime_ms: i64, size: u64) -> Option<&str> {
        self.entries
            .get(&Self::key(relative, mtime_ms, size))
            .map(String::as_str)
    }

    /// Record a digest, dropping stale keys for the same path.
    pub fn insert(&mut self, relative: &str, mtime_ms: i64, size: u64, digest: impl Into<String>) {
        let key = Self::key(relative, mtime_ms, size);
        self.put(relative.to_string(), key, digest.into());
        self.dirty = true;
    }

    fn put(&mut self, relative: String, key: String, digest: String) {
        if let Some(previous) = self.index.insert(relative, key.clone())
            && previous != key
        {
            self.entries.remove(&previous);
        }
        self.entries.insert(key, digest);
    }

    /// Drop every entry whose relative path fails `keep`.
    pub fn retain_paths(&mut self, keep: impl Fn(&str) -> bool) {
        let stale: Vec<String> = self.index.keys().filter(|p| !keep(p)).cloned().collect();
        for relative in &stale {
            if let Some(key) = self.index.remove(relative) {
                self.entries.remove(&key);
            }
        }
        if !stale.is_empty() {
            tracing::debug!(pruned = stale.len(), "Pruned checksum cache");
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the cache if anything changed since the last load or save.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(&self.entries)?;
        write_atomic(&self.path, &json, RobustnessConfig::default())?;
        self.dirty = false;
        tracing::debug!(path = %self.path.display(), entries = self.entries.len(), "Saved checksum cache");
        Ok(())
    }
}

/// The relative path part of a cache key.
fn key_path(key: &str) -> Option<&str> {
    let mut parts = key.rsplitn(3, ':');
    let _size = parts.next()?;
    let _mtime = parts.next()?;
    parts.next()
}
