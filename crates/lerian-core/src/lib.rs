//! Safety-gated incremental synchronization engine
//!
//! This crate keeps a destination project in step with an installed template
//! source tree, implementing:
//!
//! - **Safety gate**: git, source-path and destination checkers run under a
//!   retrying, timeout-bounded runner; nothing destructive happens unless the
//!   resulting [`SafetyReport`] allows it
//! - **Resolution**: blocked reports can be repaired through an injected
//!   [`safety::ResolutionContext`] (commit, stash, abort, locate source, ...)
//! - **Incremental analysis**: strategy-based comparison backed by a persisted
//!   digest cache, user sync rules, lifecycle hooks and an NDJSON audit log
//! - **Apply**: atomic copies with timestamped backups
//! - **SyncEngine**: the pipeline tying the phases together
//!
//! # Architecture
//!
//! `lerian-core` sits above the Layer 0 crates:
//!
//! ```text
//!          SyncEngine / collaborators
//!                     |
//!                lerian-core
//!                     |
//!            +--------+--------+
//!            |                 |
//!        lerian-fs        lerian-git
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lerian_core::{EngineConfig, SyncEngine, SyncOutcome, SyncRequest};
//!
//! # async fn example() -> lerian_core::Result<()> {
//! let config = EngineConfig::load("lerian-sync.toml".as_ref())?;
//! let engine = SyncEngine::builder("/path/to/project").config(config).build();
//!
//! match engine.run(SyncRequest::default()).await? {
//!     SyncOutcome::Blocked(report) => eprintln!("blocked by {:?}", report.failed_ids()),
//!     SyncOutcome::Completed { apply, .. } => println!("{} files synced", apply.applied.len()),
//!     _ => {}
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod collab;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod safety;
pub mod sync;

pub use cache::TtlCache;
pub use collab::{AutoApprove, Confirmation, Phase, Progress, ProgressEvent, Selection, TracingProgress};
pub use config::{EngineConfig, GitConfig};
pub use engine::{SyncEngine, SyncEngineBuilder, SyncOutcome, SyncRequest};
pub use error::{Error, Result};
pub use safety::{CheckResult, CheckStatus, SafetyCheckRunner, SafetyChecker, SafetyReport};
pub use sync::{
    AnalysisReport, ApplyReport, ChangeType, ComparisonStrategy, FileChange,
    IncrementalSyncAnalyzer, SyncApplier,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_error_names_failed_checks() {
        let error = Error::SafetyGateClosed {
            failed: vec!["git-operations".to_string(), "source-path".to_string()],
        };

        let display = error.to_string();
        assert!(
            display.contains("git-operations, source-path"),
            "Error display should list the failed checks, got: {}",
            display
        );
    }
}
