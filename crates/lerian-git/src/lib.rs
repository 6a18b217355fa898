//! Git inspection and remediation for the Lerian sync engine
//!
//! Porcelain status parsing, in-progress operation detection, stash and
//! upstream queries, and an allowlisted command runner for the few
//! remediation commands the engine may execute.

pub mod command;
pub mod error;
pub mod inspect;
pub mod porcelain;
pub mod remedy;
pub mod state;

pub use command::{CommandClass, GitRunner};
pub use error::{Error, Result};
pub use inspect::{Inspector, UpstreamStatus};
pub use porcelain::{StatusCategory, StatusRecord, StatusSummary, parse_porcelain};
pub use remedy::{DEFAULT_REMEDY_MESSAGE, Remediator};
pub use state::{GitOperation, detect_operations, resolve_git_dir};
