//! Remediation commands offered when the working tree is not safe to sync into

use crate::command::GitRunner;
use crate::state::GitOperation;
use crate::Result;

/// Default message for commits and stashes created on the user's behalf.
pub const DEFAULT_REMEDY_MESSAGE: &str = "chore: save work before template sync";

/// Runs the allowed remediation commands in one working tree.
#[derive(Debug, Clone)]
pub struct Remediator {
    runner: GitRunner,
}

impl Remediator {
    pub fn new(runner: GitRunner) -> Self {
        Self { runner }
    }

    /// Stage everything and commit it.
    pub async fn commit_all(&self, message: &str) -> Result<()> {
        self.runner.run(&["add", "-A"]).await?;
        self.runner.run(&["commit", "-m", message]).await?;
        tracing::info!(workdir = %self.runner.workdir().display(), "Committed pending changes");
        Ok(())
    }

    /// Stash tracked and untracked changes.
    pub async fn stash(&self, message: &str) -> Result<()> {
        self.runner
            .run(&["stash", "push", "--include-untracked", "-m", message])
            .await?;
        tracing::info!(workdir = %self.runner.workdir().display(), "Stashed pending changes");
        Ok(())
    }

    /// Cancel an in-progress operation.
    pub async fn abort(&self, operation: GitOperation) -> Result<()> {
        self.runner.run(operation.abort_args()).await?;
        tracing::info!(operation = %operation, "Aborted in-progress git operation");
        Ok(())
    }
}
