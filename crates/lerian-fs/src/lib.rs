//! Filesystem layer for the Lerian sync engine
//!
//! Metadata snapshots, streaming hashes, binary classification, atomic
//! writes and copies, bounded directory traversal and config persistence.

pub mod binary;
pub mod config;
pub mod constants;
pub mod error;
pub mod hash;
pub mod io;
pub mod metadata;
pub mod ops;
pub mod path;
pub mod traverse;

pub use config::{ConfigFormat, ConfigStore};
pub use constants::SyncPath;
pub use error::{Error, Result};
pub use hash::{FileDigest, HashAlgorithm, HashOptions};
pub use io::{CopyOptions, RobustnessConfig};
pub use metadata::{FileMetadata, MetadataCache};
pub use ops::{FileSystemOps, FsOptions};
pub use path::NormalizedPath;
pub use traverse::{EntryType, Traversal, TraverseEntry, TraverseOptions, traverse};
