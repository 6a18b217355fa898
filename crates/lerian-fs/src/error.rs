//! Error types for lerian-fs

use std::path::PathBuf;
use std::time::Duration;

/// Result type for lerian-fs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lerian-fs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stat failed or did not answer in time.
    #[error("Failed to read metadata for {path}: {cause}")]
    Metadata { path: PathBuf, cause: String },

    #[error("{operation} on {path} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        path: PathBuf,
        after: Duration,
    },

    #[error("Refusing to hash {path}: {size} bytes exceeds the {max} byte limit")]
    FileTooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("Destination already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("Failed to traverse {path}: {message}")]
    Traversal { path: PathBuf, message: String },

    #[error("Hash worker failed for {path}: {message}")]
    HashWorker { path: PathBuf, message: String },

    #[error("Failed to parse {format} config at {path}: {message}")]
    ConfigParse {
        path: PathBuf,
        format: String,
        message: String,
    },

    #[error("Failed to serialize {format} config for {path}: {message}")]
    ConfigSerialize {
        path: PathBuf,
        format: String,
        message: String,
    },

    #[error("Unsupported config format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Disk space query failed for {path}: {source}")]
    DiskSpace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn metadata(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        Self::Metadata {
            path: path.into(),
            cause: cause.to_string(),
        }
    }

    /// Whether retrying the same operation later could plausibly succeed.
    ///
    /// Timeouts and busy/interrupted I/O are transient; structural problems
    /// (missing files, oversized input, bad config) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ResourceBusy
            ),
            Self::Metadata { cause, .. } => cause.contains("timed out"),
            _ => false,
        }
    }

    /// Whether the underlying OS error is "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
