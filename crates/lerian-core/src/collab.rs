//! Collaborators the engine asks for decisions
//!
//! The engine never renders anything itself. It hands the change list to a
//! [`Selection`], asks a [`Confirmation`] before writing, and reports
//! [`ProgressEvent`]s to a [`Progress`] sink.

use async_trait::async_trait;

use crate::sync::change::FileChange;

/// Stage of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Safety,
    Analysis,
    Selection,
    Apply,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Safety => "safety",
            Self::Analysis => "analysis",
            Self::Selection => "selection",
            Self::Apply => "apply",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    PhaseStarted(Phase),
    PhaseFinished(Phase),
    FileStarted {
        path: String,
        index: usize,
        total: usize,
    },
    FileFinished {
        path: String,
        success: bool,
    },
}

/// Chooses which detected changes to apply.
#[async_trait]
pub trait Selection: Send + Sync {
    /// Return the subset of `changes` to apply, in application order.
    async fn select(&self, changes: Vec<FileChange>) -> Vec<FileChange>;
}

/// Final go/no-go before destination files are touched.
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, changes: &[FileChange]) -> bool;
}

pub trait Progress: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Selects everything and confirms without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl Selection for AutoApprove {
    async fn select(&self, changes: Vec<FileChange>) -> Vec<FileChange> {
        changes
    }
}

#[async_trait]
impl Confirmation for AutoApprove {
    async fn confirm(&self, _changes: &[FileChange]) -> bool {
        true
    }
}

/// Writes progress to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::PhaseStarted(phase) => tracing::info!(%phase, "Phase started"),
            ProgressEvent::PhaseFinished(phase) => tracing::info!(%phase, "Phase finished"),
            ProgressEvent::FileStarted { path, index, total } => {
                tracing::debug!(path = %path, index, total, "Applying change")
            }
            ProgressEvent::FileFinished { path, success } => {
                tracing::debug!(path = %path, success, "Change applied")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::change::ChangeType;

    #[tokio::test]
    async fn auto_approve_takes_everything() {
        let changes = vec![
            FileChange::new("a.md", ChangeType::New),
            FileChange::new("b.md", ChangeType::Deleted),
        ];
        let selected = AutoApprove.select(changes.clone()).await;
        assert_eq!(selected, changes);
        assert!(AutoApprove.confirm(&selected).await);
    }

    #[test]
    fn tracing_progress_accepts_every_event() {
        let progress = TracingProgress;
        progress.report(ProgressEvent::PhaseStarted(Phase::Apply));
        progress.report(ProgressEvent::FileStarted {
            path: "a.md".into(),
            index: 1,
            total: 1,
        });
        progress.report(ProgressEvent::FileFinished {
            path: "a.md".into(),
            success: true,
        });
        progress.report(ProgressEvent::PhaseFinished(Phase::Apply));
    }
}
