//! Read-only repository queries
//!
//! Status prefers the `git` CLI (it honors every ignore and attribute rule)
//! and falls back to `git2` when the executable is missing. Stash, branch and
//! upstream queries always use `git2` on the blocking pool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use git2::{BranchType, ErrorCode, Repository, Status, StatusOptions};

use crate::command::GitRunner;
use crate::porcelain::{StatusRecord, parse_porcelain};
use crate::{Error, Result};

/// Position of the current branch relative to its upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamStatus {
    pub branch: String,
    pub upstream: String,
    pub ahead: usize,
    pub behind: usize,
}

impl UpstreamStatus {
    pub fn is_diverged(&self) -> bool {
        self.ahead > 0 || self.behind > 0
    }
}

/// Open the repository whose working tree is `path`.
pub fn open(path: &Path) -> Result<Repository> {
    Repository::open(path).map_err(|e| match e.code() {
        ErrorCode::NotFound => Error::NotARepository {
            path: path.to_path_buf(),
        },
        _ => Error::Git(e),
    })
}

/// Current branch name, or `None` when HEAD is detached or unborn.
pub fn current_branch(repo: &Repository) -> Result<Option<String>> {
    let head = match repo.head() {
        Ok(head) => head,
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    if head.is_branch() {
        Ok(head.shorthand().map(str::to_string))
    } else {
        Ok(None)
    }
}

/// Number of stash entries.
pub fn stash_count(repo: &mut Repository) -> Result<usize> {
    let mut count = 0;
    repo.stash_foreach(|_, _, _| {
        count += 1;
        true
    })?;
    Ok(count)
}

/// Ahead/behind counts against the configured upstream, if any.
pub fn upstream_status(repo: &Repository) -> Result<Option<UpstreamStatus>> {
    let Some(branch_name) = current_branch(repo)? else {
        return Ok(None);
    };
    let branch = repo.find_branch(&branch_name, BranchType::Local)?;
    let upstream = match branch.upstream() {
        Ok(upstream) => upstream,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let (Some(local), Some(remote)) = (branch.get().target(), upstream.get().target()) else {
        return Ok(None);
    };
    let (ahead, behind) = repo.graph_ahead_behind(local, remote)?;
    let upstream_name = upstream.name()?.unwrap_or("upstream").to_string();

    Ok(Some(UpstreamStatus {
        branch: branch_name,
        upstream: upstream_name,
        ahead,
        behind,
    }))
}

/// Status records derived from `git2`, encoded as porcelain v1 codes.
pub fn status_records(repo: &Repository) -> Result<Vec<StatusRecord>> {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false)
        .renames_head_to_index(true);

    let statuses = repo.statuses(Some(&mut options))?;
    let mut records = Vec::with_capacity(statuses.len());
    for entry in statuses.iter() {
        let Some(path) = entry.path() else { continue };
        let (index, worktree) = porcelain_code(entry.status());
        if index == ' ' && worktree == ' ' {
            continue;
        }
        let orig_path = entry
            .head_to_index()
            .filter(|_| index == 'R')
            .and_then(|delta| delta.old_file().path())
            .map(|p| p.to_string_lossy().replace('\\', "/"));
        records.push(StatusRecord {
            index,
            worktree,
            path: path.to_string(),
            orig_path,
        });
    }
    Ok(records)
}

fn porcelain_code(status: Status) -> (char, char) {
    if status.is_conflicted() {
        return ('U', 'U');
    }
    if status.is_wt_new() && !status.intersects(index_flags()) {
        return ('?', '?');
    }
    if status.is_ignored() {
        return ('!', '!');
    }

    let index = if status.is_index_new() {
        'A'
    } else if status.is_index_modified() {
        'M'
    } else if status.is_index_deleted() {
        'D'
    } else if status.is_index_renamed() {
        'R'
    } else if status.is_index_typechange() {
        'T'
    } else {
        ' '
    };
    let worktree = if status.is_wt_modified() {
        'M'
    } else if status.is_wt_deleted() {
        'D'
    } else if status.is_wt_renamed() {
        'R'
    } else if status.is_wt_typechange() {
        'T'
    } else {
        ' '
    };
    (index, worktree)
}

fn index_flags() -> Status {
    Status::INDEX_NEW
        | Status::INDEX_MODIFIED
        | Status::INDEX_DELETED
        | Status::INDEX_RENAMED
        | Status::INDEX_TYPECHANGE
}

/// Async facade over one working tree.
#[derive(Debug, Clone)]
pub struct Inspector {
    workdir: PathBuf,
    runner: GitRunner,
}

impl Inspector {
    pub fn new(workdir: impl Into<PathBuf>, command_timeout: Duration) -> Self {
        let workdir = workdir.into();
        let runner = GitRunner::new(workdir.clone(), command_timeout);
        Self { workdir, runner }
    }

    pub fn with_runner(workdir: impl Into<PathBuf>, runner: GitRunner) -> Self {
        Self {
            workdir: workdir.into(),
            runner,
        }
    }

    pub fn runner(&self) -> &GitRunner {
        &self.runner
    }

    /// Working-tree status, via the CLI or the `git2` fallback.
    pub async fn status(&self) -> Result<Vec<StatusRecord>> {
        match self
            .runner
            .run(&["status", "--porcelain=v1", "--untracked-files=all"])
            .await
        {
            Ok(output) => Ok(parse_porcelain(&output)),
            Err(e) if e.is_unavailable() => {
                tracing::info!("git executable not found, reading status through libgit2");
                self.with_repo(|repo| status_records(repo)).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn stash_count(&self) -> Result<usize> {
        self.with_repo(stash_count).await
    }

    pub async fn upstream(&self) -> Result<Option<UpstreamStatus>> {
        self.with_repo(|repo| upstream_status(repo)).await
    }

    pub async fn current_branch(&self) -> Result<Option<String>> {
        self.with_repo(|repo| current_branch(repo)).await
    }

    async fn with_repo<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Repository) -> Result<T> + Send + 'static,
    {
        let path = self.workdir.clone();
        tokio::task::spawn_blocking(move || {
            let mut repo = open(&path)?;
            f(&mut repo)
        })
        .await
        .map_err(|e| Error::Worker {
            message: e.to_string(),
        })?
    }
}
