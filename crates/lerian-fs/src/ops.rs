//! The filesystem facade used by the sync engine

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::binary;
use crate::constants::{DEFAULT_BINARY_SAMPLE, DEFAULT_BINARY_THRESHOLD, DEFAULT_CHUNK_SIZE};
use crate::hash::{self, FileDigest, HashAlgorithm, HashOptions};
use crate::io::{self, CopyOptions};
use crate::metadata::{self, FileMetadata, MetadataCache};
use crate::traverse::{self, Traversal, TraverseOptions};
use crate::{Error, Result};

/// Limits and tuning for [`FileSystemOps`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsOptions {
    pub metadata_timeout_ms: u64,
    /// Allowed mtime drift before a cached metadata entry is stale.
    pub metadata_tolerance_ms: u64,
    pub hash_timeout_ms: u64,
    pub chunk_size: usize,
    pub offload_threshold: u64,
    pub max_file_size: u64,
    pub binary_sample: usize,
    pub binary_threshold: f64,
    pub traverse_concurrency: usize,
}

impl Default for FsOptions {
    fn default() -> Self {
        let hashing = HashOptions::default();
        Self {
            metadata_timeout_ms: 5_000,
            metadata_tolerance_ms: 1_000,
            hash_timeout_ms: hashing.timeout.as_millis() as u64,
            chunk_size: DEFAULT_CHUNK_SIZE,
            offload_threshold: hashing.offload_threshold,
            max_file_size: hashing.max_file_size,
            binary_sample: DEFAULT_BINARY_SAMPLE,
            binary_threshold: DEFAULT_BINARY_THRESHOLD,
            traverse_concurrency: 8,
        }
    }
}

impl FsOptions {
    pub fn hash_options(&self) -> HashOptions {
        HashOptions {
            chunk_size: self.chunk_size,
            offload_threshold: self.offload_threshold,
            max_file_size: self.max_file_size,
            timeout: Duration::from_millis(self.hash_timeout_ms),
        }
    }
}

/// Metadata, hashing, classification, atomic copies and traversal, sharing
/// one [`MetadataCache`].
#[derive(Debug)]
pub struct FileSystemOps {
    options: FsOptions,
    cache: MetadataCache,
}

impl Default for FileSystemOps {
    fn default() -> Self {
        Self::new(FsOptions::default())
    }
}

impl FileSystemOps {
    pub fn new(options: FsOptions) -> Self {
        let cache = MetadataCache::new(Duration::from_millis(options.metadata_tolerance_ms));
        Self { options, cache }
    }

    pub fn options(&self) -> &FsOptions {
        &self.options
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Stat `path`, keeping enrichments of a still-valid cached snapshot.
    pub async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let timeout = Duration::from_millis(self.options.metadata_timeout_ms);
        let fresh = metadata::read_metadata(path, timeout).await?;
        Ok(self.cache.refresh(path, fresh))
    }

    /// Stream `path` through `algorithm` and remember the digest.
    pub async fn hash(&self, path: &Path, algorithm: HashAlgorithm) -> Result<FileDigest> {
        let digest = hash::hash_file(path, algorithm, &self.options.hash_options()).await?;
        if let Some(cached) = self.cache.get(path)
            && cached.size == digest.size
            && cached.mtime_ms == digest.mtime_ms
        {
            self.cache.record_hash(path, &digest.hex);
        }
        Ok(digest)
    }

    /// Sample-based binary check, answered from the cache when possible.
    pub async fn is_binary(&self, path: &Path) -> Result<bool> {
        let meta = self.metadata(path).await?;
        if let Some(known) = meta.is_binary {
            return Ok(known);
        }
        let detected = binary::is_binary(
            path,
            self.options.binary_sample,
            self.options.binary_threshold,
        )
        .await?;
        self.cache.record_binary(path, detected);
        Ok(detected)
    }

    pub async fn copy_atomic(&self, src: &Path, dst: &Path, options: CopyOptions) -> Result<u64> {
        let bytes = io::copy_atomic(src, dst, options).await?;
        self.cache.invalidate(dst);
        tracing::trace!(src = %src.display(), dst = %dst.display(), bytes, "Copied file");
        Ok(bytes)
    }

    pub async fn remove_tolerant(&self, path: &Path) -> Result<bool> {
        let removed = io::remove_tolerant(path).await?;
        self.cache.invalidate(path);
        Ok(removed)
    }

    /// Default traversal options with the configured concurrency.
    pub fn traverse_options(&self) -> TraverseOptions {
        TraverseOptions {
            max_concurrency: self.options.traverse_concurrency,
            ..TraverseOptions::default()
        }
    }

    pub fn traverse(&self, root: &Path, options: TraverseOptions) -> Traversal {
        traverse::traverse(root, options)
    }

    /// Free bytes available to this user on the filesystem holding `path`.
    pub async fn available_space(&self, path: &Path) -> Result<u64> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || fs2::available_space(&owned))
            .await
            .map_err(|e| Error::DiskSpace {
                path: path.to_path_buf(),
                source: std::io::Error::other(e),
            })?
            .map_err(|source| Error::DiskSpace {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_is_remembered_on_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "# a").unwrap();

        let ops = FileSystemOps::default();
        assert_eq!(ops.metadata(&path).await.unwrap().hash, None);
        let digest = ops.hash(&path, HashAlgorithm::Sha256).await.unwrap();
        assert_eq!(ops.metadata(&path).await.unwrap().hash, Some(digest.hex));
    }

    #[tokio::test]
    async fn binary_flag_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.bin");
        std::fs::write(&path, [0u8, 1, 2, 3]).unwrap();

        let ops = FileSystemOps::default();
        assert!(ops.is_binary(&path).await.unwrap());
        assert_eq!(ops.cache().get(&path).unwrap().is_binary, Some(true));
    }

    #[tokio::test]
    async fn available_space_reports_something() {
        let dir = tempfile::tempdir().unwrap();
        let ops = FileSystemOps::default();
        assert!(ops.available_space(dir.path()).await.is_ok());
    }
}
