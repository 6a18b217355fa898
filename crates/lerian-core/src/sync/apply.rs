//! Applying a selected change list to the destination tree
//!
//! Only runs behind a passing [`SafetyReport`]. Single-file failures are
//! collected in the report rather than aborting the run, and a change whose
//! path would leave the destination is refused before any hook fires.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use lerian_fs::{CopyOptions, FileSystemOps, NormalizedPath};

use super::analyzer::IncrementalSyncAnalyzer;
use super::audit::AuditResult;
use super::backup::BackupStore;
use super::change::{ChangeType, FileChange};
use super::hooks::{HookContext, HookStats, HookType};
use crate::collab::{Progress, ProgressEvent};
use crate::safety::SafetyReport;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyOptions {
    /// Report what would happen without touching the destination
    pub dry_run: bool,
    /// Back up destination files before overwriting or deleting them
    pub backups: bool,
    pub preserve_timestamps: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            backups: true,
            preserve_timestamps: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub path: String,
    pub change_type: ChangeType,
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedChange {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChange {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<AppliedChange>,
    pub skipped: Vec<SkippedChange>,
    pub failed: Vec<FailedChange>,
    pub dry_run: bool,
    pub hooks: HookStats,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn applied_paths(&self) -> Vec<&str> {
        self.applied.iter().map(|c| c.path.as_str()).collect()
    }
}

#[derive(Debug)]
pub struct SyncApplier {
    fs: Arc<FileSystemOps>,
    options: ApplyOptions,
}

impl SyncApplier {
    pub fn new(fs: Arc<FileSystemOps>, options: ApplyOptions) -> Self {
        Self { fs, options }
    }

    pub fn options(&self) -> &ApplyOptions {
        &self.options
    }

    /// Apply `changes` from the analyzer's source to its destination.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SafetyGateClosed`] when `safety` does not allow
    /// proceeding. Per-file errors land in [`ApplyReport::failed`].
    pub async fn apply(
        &self,
        safety: &SafetyReport,
        changes: &[FileChange],
        analyzer: &IncrementalSyncAnalyzer,
        ctx: &HookContext,
        progress: &dyn Progress,
    ) -> Result<ApplyReport> {
        if !safety.can_proceed {
            return Err(Error::SafetyGateClosed {
                failed: safety.failed_ids(),
            });
        }

        let backups = BackupStore::new(analyzer.destination());
        let mut report = ApplyReport {
            dry_run: self.options.dry_run,
            ..Default::default()
        };
        let total = changes.len();

        for (index, change) in changes.iter().enumerate() {
            let path = change.relative_path.clone();
            progress.report(ProgressEvent::FileStarted {
                path: path.clone(),
                index: index + 1,
                total,
            });
            if change.change_type == ChangeType::Moved {
                report.skipped.push(SkippedChange {
                    path: path.clone(),
                    reason: "moves are applied as a delete plus a new file".to_string(),
                });
                analyzer
                    .audit()
                    .record(operation_name(change), json!({ "path": path }), AuditResult::Skipped)
                    .await;
                progress.report(ProgressEvent::FileFinished { path, success: true });
                continue;
            }

            if !NormalizedPath::new(&path).is_contained() {
                let e = Error::UnsafePath { path: path.clone() };
                tracing::warn!(path = %path, "Refusing change outside the destination");
                analyzer
                    .audit()
                    .record(
                        operation_name(change),
                        json!({ "path": path, "error": e.to_string() }),
                        AuditResult::Failure,
                    )
                    .await;
                report.failed.push(FailedChange {
                    path: path.clone(),
                    error: e.to_string(),
                });
                progress.report(ProgressEvent::FileFinished { path, success: false });
                continue;
            }

            let file_ctx = ctx.for_path(&path);
            report
                .hooks
                .merge(analyzer.execute_hooks(HookType::BeforeOperation, &file_ctx).await);

            let outcome = self.apply_one(change, analyzer, &backups).await;
            let success = outcome.is_ok();
            match outcome {
                Ok(backup) => {
                    report
                        .hooks
                        .merge(analyzer.execute_hooks(HookType::AfterOperation, &file_ctx).await);
                    analyzer
                        .audit()
                        .record(
                            operation_name(change),
                            json!({
                                "path": path,
                                "dryRun": self.options.dry_run,
                                "backup": backup.as_ref().map(|b| b.display().to_string()),
                            }),
                            AuditResult::Success,
                        )
                        .await;
                    report.applied.push(AppliedChange {
                        path: path.clone(),
                        change_type: change.change_type,
                        backup,
                    });
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to apply change");
                    report.hooks.merge(
                        analyzer
                            .execute_hooks(HookType::OnError, &file_ctx.with_error(&e))
                            .await,
                    );
                    analyzer
                        .audit()
                        .record(
                            operation_name(change),
                            json!({ "path": path, "error": e.to_string() }),
                            AuditResult::Failure,
                        )
                        .await;
                    report.failed.push(FailedChange {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
            progress.report(ProgressEvent::FileFinished { path, success });
        }

        tracing::info!(
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            dry_run = report.dry_run,
            "Apply complete"
        );
        Ok(report)
    }

    /// Returns the backup taken, if any.
    async fn apply_one(
        &self,
        change: &FileChange,
        analyzer: &IncrementalSyncAnalyzer,
        backups: &BackupStore,
    ) -> Result<Option<PathBuf>> {
        let rel = NormalizedPath::new(&change.relative_path);
        let source = rel.under(analyzer.source());
        let destination = rel.under(analyzer.destination());

        match change.change_type {
            _ if self.options.dry_run => Ok(None),
            ChangeType::Moved => Ok(None),
            ChangeType::New | ChangeType::Modified => {
                let backup = if self.options.backups {
                    backups.backup(&self.fs, &change.relative_path).await?
                } else {
                    None
                };
                self.fs
                    .copy_atomic(
                        &source,
                        &destination,
                        CopyOptions {
                            overwrite: true,
                            preserve_timestamps: self.options.preserve_timestamps,
                        },
                    )
                    .await?;
                Ok(backup)
            }
            ChangeType::Deleted => {
                let backup = if self.options.backups {
                    backups.backup(&self.fs, &change.relative_path).await?
                } else {
                    None
                };
                self.fs.remove_tolerant(&destination).await?;
                Ok(backup)
            }
        }
    }
}

fn operation_name(change: &FileChange) -> &'static str {
    match change.change_type {
        ChangeType::New => "create_file",
        ChangeType::Modified => "update_file",
        ChangeType::Deleted => "delete_file",
        ChangeType::Moved => "move_file",
    }
}
