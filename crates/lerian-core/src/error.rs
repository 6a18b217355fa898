//! Error types for lerian-core

use std::path::PathBuf;
use std::time::Duration;

/// Result type for lerian-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lerian-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Destructive work was requested without a passing safety report
    #[error("Safety checks did not pass (failed: {})", failed.join(", "))]
    SafetyGateClosed { failed: Vec<String> },

    /// A sync rule could not be compiled
    #[error("Invalid sync rule #{index}: {message}")]
    InvalidRule { index: usize, message: String },

    /// The rules file exists but cannot be used
    #[error("Invalid rules file {path}: {message}")]
    RulesFile { path: PathBuf, message: String },

    /// A hook handler failed
    #[error("Hook {id} failed: {message}")]
    Hook { id: String, message: String },

    /// A safety checker failed in a way the runner should retry
    #[error("Checker {id} failed: {message}")]
    Checker { id: String, message: String },

    /// No usable source tree was found
    #[error("Source tree unavailable: {message}")]
    SourceUnavailable { message: String },

    /// A resolution action could not be carried out
    #[error("Resolution failed: {message}")]
    Resolution { message: String },

    /// A change path would resolve outside the tree it targets
    #[error("Path {path} escapes the sync root")]
    UnsafePath { path: String },

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The tracing subscriber could not be installed
    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    /// A spawned task failed to complete
    #[error("Background task failed: {message}")]
    Task { message: String },

    // Transparent wrappers for underlying crate errors
    /// Filesystem error from lerian-fs
    #[error(transparent)]
    Fs(#[from] lerian_fs::Error),

    /// Git error from lerian-git
    #[error(transparent)]
    Git(#[from] lerian_git::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Checker { .. } => true,
            Self::Fs(e) => e.is_transient(),
            Self::Git(e) => e.is_transient(),
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ResourceBusy
            ),
            _ => false,
        }
    }
}
