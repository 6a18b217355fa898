//! Working-tree safety: repository presence, in-progress operations,
//! uncommitted changes, stashes and upstream divergence

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use lerian_git::{Inspector, StatusSummary, detect_operations, resolve_git_dir};

use super::checker::SafetyChecker;
use super::result::CheckResult;
use crate::{Error, Result};

pub const GIT_CHECKER_ID: &str = "git";

pub struct GitChecker {
    root: PathBuf,
    inspector: Inspector,
}

impl GitChecker {
    pub fn new(root: impl Into<PathBuf>, command_timeout: Duration) -> Self {
        let root = root.into();
        let inspector = Inspector::new(root.clone(), command_timeout);
        Self { root, inspector }
    }

    pub fn with_inspector(root: impl Into<PathBuf>, inspector: Inspector) -> Self {
        Self {
            root: root.into(),
            inspector,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn operations_check(&self, git_dir: &Path) -> CheckResult {
        let operations = detect_operations(git_dir);
        if operations.is_empty() {
            return CheckResult::pass("git-operations", "No git operation in progress");
        }
        let names: Vec<&str> = operations.iter().map(|op| op.name()).collect();
        CheckResult::fail(
            "git-operations",
            format!("Git {} in progress", names.join(", ")),
        )
        .with_details(operations.iter().map(|op| op.guidance()))
        .with_path(&self.root)
        .with_metadata("operations", json!(names))
    }

    async fn status_check(&self) -> Result<CheckResult> {
        let records = match self.inspector.status().await {
            Ok(records) => records,
            Err(e) if e.is_transient() => return Err(Error::Git(e)),
            Err(e) => {
                return Ok(CheckResult::fail(
                    "git-status",
                    format!("Could not read git status: {e}"),
                ));
            }
        };
        let summary = StatusSummary::from_records(records);

        if summary.has_conflicts() {
            return Ok(CheckResult::fail(
                "git-status",
                format!("{} conflicted file(s) in the working tree", summary.conflicted_paths().len()),
            )
            .with_details(summary.advice())
            .with_metadata("conflicted", json!(summary.conflicted_paths())));
        }
        if summary.is_clean() {
            return Ok(CheckResult::pass("git-status", "Working tree is clean"));
        }

        Ok(CheckResult::warn(
            "git-status",
            format!("{} uncommitted change(s) in the working tree", summary.uncommitted()),
        )
        .with_details(summary.advice())
        .with_metadata("uncommitted", summary.uncommitted()))
    }

    async fn stash_check(&self) -> CheckResult {
        match self.inspector.stash_count().await {
            Ok(0) => CheckResult::info("git-stash", "No stashed changes"),
            Ok(count) => CheckResult::info("git-stash", format!("{count} stash entries present"))
                .with_metadata("count", count),
            Err(e) => CheckResult::info("git-stash", format!("Stash count unavailable: {e}")),
        }
    }

    async fn upstream_check(&self) -> CheckResult {
        match self.inspector.upstream().await {
            Ok(None) => CheckResult::info("git-upstream", "No upstream branch configured"),
            Ok(Some(upstream)) if upstream.is_diverged() => {
                let mut result = CheckResult::warn(
                    "git-upstream",
                    format!(
                        "Branch {} is {} ahead and {} behind {}",
                        upstream.branch, upstream.ahead, upstream.behind, upstream.upstream
                    ),
                )
                .with_metadata("ahead", upstream.ahead)
                .with_metadata("behind", upstream.behind);
                if upstream.behind > 0 {
                    result = result.with_detail("Pull the upstream changes with `git pull`");
                }
                if upstream.ahead > 0 {
                    result = result.with_detail("Publish local commits with `git push`");
                }
                result
            }
            Ok(Some(upstream)) => CheckResult::pass(
                "git-upstream",
                format!("Branch {} is up to date with {}", upstream.branch, upstream.upstream),
            ),
            Err(e) => CheckResult::warn("git-upstream", format!("Could not compare with upstream: {e}")),
        }
    }
}

#[async_trait]
impl SafetyChecker for GitChecker {
    fn id(&self) -> &str {
        GIT_CHECKER_ID
    }

    async fn perform_checks(&self) -> Result<Vec<CheckResult>> {
        let Some(git_dir) = resolve_git_dir(&self.root) else {
            return Ok(vec![
                CheckResult::warn(
                    "git-repository",
                    "Destination is not a git repository; synced changes cannot be reviewed or reverted with git",
                )
                .with_path(&self.root),
            ]);
        };

        let mut results = vec![
            CheckResult::pass("git-repository", "Destination is a git repository").with_path(&self.root),
            self.operations_check(&git_dir),
        ];
        results.push(self.status_check().await?);
        results.push(self.stash_check().await);
        results.push(self.upstream_check().await);
        Ok(results)
    }
}
