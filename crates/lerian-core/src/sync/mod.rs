//! Change detection and application between a source and a destination tree
//!
//! This module provides:
//! - **detector**: walk both trees and classify each relative path
//! - **analyzer**: strategy-based comparison with a persisted digest cache,
//!   sync rules, hooks and audit logging
//! - **apply**: write a selected change list with pre-overwrite backups
//! - **rules**: user include/exclude/priority/transform rules
//! - **hooks**: lifecycle hook registry, plugins and command hooks

pub mod analyzer;
pub mod apply;
pub mod audit;
pub mod backup;
pub mod change;
pub mod checksum;
pub mod detector;
pub mod hooks;
pub mod rules;
pub mod strategy;

pub use analyzer::{AnalysisReport, AnalyzerConfig, AnalyzerStats, IncrementalSyncAnalyzer};
pub use apply::{ApplyOptions, ApplyReport, SyncApplier};
pub use audit::{AuditEntry, AuditLog, AuditResult};
pub use backup::BackupStore;
pub use change::{ChangeSet, ChangeType, FileChange};
pub use checksum::ChecksumCache;
pub use detector::{ChangeComparator, ChangeDetector, ScannedFile};
pub use hooks::{
    CommandHook, FnHook, HookConfig, HookContext, HookHandler, HookRegistry, HookStats, HookType,
    SyncPlugin,
};
pub use rules::{RuleContext, RuleSet, SyncRule};
pub use strategy::ComparisonStrategy;
