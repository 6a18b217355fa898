//! In-progress operation detection from `.git` marker files

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A multi-step git operation left unfinished in the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitOperation {
    Merge,
    Rebase,
    CherryPick,
    Revert,
    Bisect,
}

impl GitOperation {
    pub const ALL: [GitOperation; 5] = [
        Self::Merge,
        Self::Rebase,
        Self::CherryPick,
        Self::Revert,
        Self::Bisect,
    ];

    /// Entries under the git dir whose presence signals this operation.
    pub fn markers(self) -> &'static [&'static str] {
        match self {
            Self::Merge => &["MERGE_HEAD"],
            Self::Rebase => &["rebase-merge", "rebase-apply"],
            Self::CherryPick => &["CHERRY_PICK_HEAD"],
            Self::Revert => &["REVERT_HEAD"],
            Self::Bisect => &["BISECT_LOG"],
        }
    }

    /// Arguments that cancel the operation.
    pub fn abort_args(self) -> &'static [&'static str] {
        match self {
            Self::Merge => &["merge", "--abort"],
            Self::Rebase => &["rebase", "--abort"],
            Self::CherryPick => &["cherry-pick", "--abort"],
            Self::Revert => &["revert", "--abort"],
            Self::Bisect => &["bisect", "reset"],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Rebase => "rebase",
            Self::CherryPick => "cherry-pick",
            Self::Revert => "revert",
            Self::Bisect => "bisect",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// Human guidance naming the abort command.
    pub fn guidance(self) -> String {
        match self {
            Self::Bisect => {
                "A bisect session is active. End it with `git bisect reset` before syncing".to_string()
            }
            op => format!(
                "A {} is in progress. Finish it, or cancel it with `git {}`",
                op.name(),
                op.abort_args().join(" ")
            ),
        }
    }
}

impl std::fmt::Display for GitOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Locate the git directory for a working tree.
///
/// Handles both a `.git` directory and the `.git` file used by linked
/// worktrees and submodules (`gitdir: <path>`).
pub fn resolve_git_dir(worktree: &Path) -> Option<PathBuf> {
    let dot_git = worktree.join(".git");
    if dot_git.is_dir() {
        return Some(dot_git);
    }
    let content = std::fs::read_to_string(&dot_git).ok()?;
    let target = content.lines().find_map(|l| l.strip_prefix("gitdir:"))?.trim();
    let target = Path::new(target);
    let resolved = if target.is_absolute() {
        target.to_path_buf()
    } else {
        worktree.join(target)
    };
    resolved.is_dir().then_some(resolved)
}

/// Every operation whose markers exist under `git_dir`, in [`GitOperation::ALL`] order.
pub fn detect_operations(git_dir: &Path) -> Vec<GitOperation> {
    GitOperation::ALL
        .into_iter()
        .filter(|op| op.markers().iter().any(|m| git_dir.join(m).exists()))
        .collect()
}
