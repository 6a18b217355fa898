//! Error types for lerian-git

use std::path::PathBuf;
use std::time::Duration;

/// Result type for lerian-git operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lerian-git operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Filesystem error: {0}")]
    Fs(#[from] lerian_fs::Error),

    #[error("Not a git repository: {path}")]
    NotARepository { path: PathBuf },

    #[error("Refusing to run `git {command}`: not an allowed inspection or remediation command")]
    DisallowedCommand { command: String },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`git {command}` exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`git {command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("Git worker task failed: {message}")]
    Worker { message: String },
}

impl Error {
    /// The git executable could not be found.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    /// Whether retrying later could plausibly succeed.
    ///
    /// `index.lock` contention shows up as a failed command mentioning the
    /// lock file; it clears once the other git process finishes.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Fs(e) => e.is_transient(),
            Self::Git(e) => e.code() == git2::ErrorCode::Locked,
            Self::CommandFailed { stderr, .. } => stderr.contains("index.lock"),
            _ => false,
        }
    }
}
