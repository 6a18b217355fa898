//! Well-known file and directory names used by the sync engine.

use std::path::Path;

/// Fixed names the engine reads or writes inside a destination tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPath {
    /// The `.git` directory
    GitDir,
    /// Engine state directory (checksum cache, audit log, backups)
    CacheDir,
    /// Persisted digest cache inside [`SyncPath::CacheDir`]
    ChecksumFile,
    /// Newline-delimited JSON audit log inside [`SyncPath::CacheDir`]
    AuditLog,
    /// Pre-overwrite backups inside [`SyncPath::CacheDir`]
    BackupsDir,
    /// User-supplied sync rules at the destination root
    RulesFile,
}

impl SyncPath {
    /// Path relative to the destination root.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitDir => ".git",
            Self::CacheDir => ".lerian-sync-cache",
            Self::ChecksumFile => ".lerian-sync-cache/checksums.json",
            Self::AuditLog => ".lerian-sync-cache/audit.log",
            Self::BackupsDir => ".lerian-sync-cache/backups",
            Self::RulesFile => ".lerian-sync-rules.json",
        }
    }
}

impl AsRef<Path> for SyncPath {
    fn as_ref(&self) -> &Path {
        Path::new(self.as_str())
    }
}

impl AsRef<str> for SyncPath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for SyncPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Default streaming chunk size for hashing (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of leading bytes sampled for binary classification.
pub const DEFAULT_BINARY_SAMPLE: usize = 1024;

/// Default suspicious-byte ratio above which a sample is binary.
pub const DEFAULT_BINARY_THRESHOLD: f64 = 0.10;
