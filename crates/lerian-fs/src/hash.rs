//! Streaming content digests
//!
//! Files are always read in fixed-size chunks. Large files are hashed on the
//! blocking thread pool; small ones inline on the async runtime. Both paths
//! feed the same [`StreamingDigest`], so the digest for a given file never
//! depends on where it was computed.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::DEFAULT_CHUNK_SIZE;
use crate::metadata::mtime_millis;
use crate::{Error, Result};

/// Supported digest functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Incremental digest state for one [`HashAlgorithm`].
pub enum StreamingDigest {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl StreamingDigest {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(chunk),
            Self::Sha512(h) => h.update(chunk),
        }
    }

    /// Lowercase hex of the final digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => format!("{:x}", h.finalize()),
            Self::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Tuning for [`hash_file`].
#[derive(Debug, Clone, Copy)]
pub struct HashOptions {
    /// Bytes read per step.
    pub chunk_size: usize,
    /// Files strictly larger than this are hashed on the blocking pool.
    pub offload_threshold: u64,
    /// Files strictly larger than this are rejected outright.
    pub max_file_size: u64,
    /// Upper bound for the whole operation.
    pub timeout: Duration,
}

impl Default for HashOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            offload_threshold: 4 * 1024 * 1024,
            max_file_size: 512 * 1024 * 1024,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Digest of a file together with the metadata observed when it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub algorithm: HashAlgorithm,
    pub hex: String,
    pub size: u64,
    pub mtime_ms: i64,
}

/// Hash an in-memory buffer.
pub fn hash_bytes(bytes: &[u8], algorithm: HashAlgorithm) -> String {
    let mut digest = StreamingDigest::new(algorithm);
    digest.update(bytes);
    digest.finalize_hex()
}

/// Hash a blocking reader in `chunk_size` steps.
pub fn hash_reader<R: Read>(
    mut reader: R,
    algorithm: HashAlgorithm,
    chunk_size: usize,
) -> std::io::Result<String> {
    let mut digest = StreamingDigest::new(algorithm);
    let mut buffer = vec![0u8; chunk_size.max(1)];
    loop {
        match reader.read(&mut buffer)? {
            0 => break,
            n => digest.update(&buffer[..n]),
        }
    }
    Ok(digest.finalize_hex())
}

/// Hash an async reader in `chunk_size` steps.
pub async fn hash_async_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    algorithm: HashAlgorithm,
    chunk_size: usize,
) -> std::io::Result<String> {
    let mut digest = StreamingDigest::new(algorithm);
    let mut buffer = vec![0u8; chunk_size.max(1)];
    loop {
        match reader.read(&mut buffer).await? {
            0 => break,
            n => digest.update(&buffer[..n]),
        }
    }
    Ok(digest.finalize_hex())
}

/// Hash the file at `path`.
///
/// Fails with [`Error::FileTooLarge`] before reading anything when the file
/// exceeds `options.max_file_size`, and with [`Error::Timeout`] when the
/// whole operation outlives `options.timeout`.
pub async fn hash_file(
    path: &Path,
    algorithm: HashAlgorithm,
    options: &HashOptions,
) -> Result<FileDigest> {
    let work = async {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        let size = meta.len();
        if size > options.max_file_size {
            return Err(Error::FileTooLarge {
                path: path.to_path_buf(),
                size,
                max: options.max_file_size,
            });
        }
        let mtime_ms = mtime_millis(&meta);

        let hex = if size > options.offload_threshold {
            hash_offloaded(path, algorithm, options.chunk_size).await?
        } else {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| Error::io(path, e))?;
            hash_async_reader(file, algorithm, options.chunk_size)
                .await
                .map_err(|e| Error::io(path, e))?
        };

        Ok(FileDigest {
            algorithm,
            hex,
            size,
            mtime_ms,
        })
    };

    tokio::time::timeout(options.timeout, work)
        .await
        .map_err(|_| Error::Timeout {
            operation: "hash",
            path: path.to_path_buf(),
            after: options.timeout,
        })?
}

async fn hash_offloaded(path: &Path, algorithm: HashAlgorithm, chunk_size: usize) -> Result<String> {
    let owned = path.to_path_buf();
    tracing::trace!(path = %path.display(), "Offloading hash to blocking pool");
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&owned)?;
        hash_reader(file, algorithm, chunk_size)
    })
    .await
    .map_err(|e| Error::HashWorker {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?
    .map_err(|e| Error::io(path, e))
}
