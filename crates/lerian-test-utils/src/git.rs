//! Git repository fixtures at three realism levels.
//!
//! Pick the cheapest fixture that exercises the code under test: the fake
//! layout is enough for marker-file detection, real repositories are needed
//! once status, stash or upstream queries run.

use std::fs;
use std::path::Path;
use std::process::Command;

/// Creates a minimal `.git` directory without a real object store.
///
/// Realism level: **FAKE**. Enough for `.git` presence and in-progress
/// operation marker detection; any status query against it fails.
///
/// # Panics
/// Panics if the filesystem operations fail.
pub fn fake_git_dir(path: &Path) {
    fs::create_dir_all(path.join(".git/refs/heads"))
        .unwrap_or_else(|e| panic!("fake_git_dir: failed to create .git: {e}"));
    fs::write(path.join(".git/HEAD"), "ref: refs/heads/main\n")
        .unwrap_or_else(|e| panic!("fake_git_dir: failed to write HEAD: {e}"));
}

/// Initialises a real, empty repository using `git2`.
///
/// Realism level: **REAL**. HEAD is unborn; there is no upstream.
///
/// # Panics
/// Panics if `git2::Repository::init` fails.
pub fn real_git_repo(path: &Path) -> git2::Repository {
    git2::Repository::init(path).unwrap_or_else(|e| {
        panic!(
            "real_git_repo: failed to init repository at {}: {e}",
            path.display()
        )
    })
}

/// Runs `git` in `path`, panicking with stderr on failure.
pub fn git(path: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .unwrap_or_else(|e| panic!("git {args:?}: failed to spawn: {e}"));
    if !output.status.success() {
        panic!(
            "git {args:?} failed:\n{}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Initialises a repository with one commit on `main` using the `git` CLI.
///
/// Realism level: **REAL WITH HISTORY**. Identity is configured locally and
/// signing disabled, so further commits made by code under test succeed.
///
/// # Panics
/// Panics if any git operation fails.
pub fn real_git_repo_with_commit(path: &Path) {
    git(path, &["init"]);
    git(path, &["config", "user.email", "test@test.com"]);
    git(path, &["config", "user.name", "Test User"]);
    git(path, &["config", "commit.gpgsign", "false"]);

    fs::write(path.join("README.md"), "# Test")
        .unwrap_or_else(|e| panic!("real_git_repo_with_commit: failed to write README.md: {e}"));

    git(path, &["add", "."]);
    git(path, &["commit", "-m", "Initial commit"]);
    // Older git versions may refuse; the branch name only matters cosmetically.
    let _ = Command::new("git")
        .args(["branch", "-M", "main"])
        .current_dir(path)
        .output();
}

/// Marks a merge as in progress by writing `.git/MERGE_HEAD`.
///
/// Works on fake and real layouts; real repositories get the HEAD commit id
/// so git itself accepts the marker.
///
/// # Panics
/// Panics if the marker cannot be written.
pub fn simulate_merge_in_progress(path: &Path) {
    let head = git2::Repository::open(path)
        .ok()
        .and_then(|repo| {
            let oid = repo.head().ok()?.target();
            oid
        })
        .map(|oid| format!("{oid}\n"))
        .unwrap_or_else(|| "0000000000000000000000000000000000000000\n".to_string());
    fs::write(path.join(".git/MERGE_HEAD"), head)
        .unwrap_or_else(|e| panic!("simulate_merge_in_progress: {e}"));
}

/// Clones `origin` into `path` so the local `main` tracks `origin/main`.
///
/// `origin` must already have history (see [`real_git_repo_with_commit`]).
///
/// # Panics
/// Panics if cloning or configuration fails.
pub fn clone_with_upstream(origin: &Path, path: &Path) {
    let parent = path
        .parent()
        .unwrap_or_else(|| panic!("clone_with_upstream: {} has no parent", path.display()));
    let target = path.to_string_lossy().into_owned();
    let source = origin.to_string_lossy().into_owned();
    git(parent, &["clone", "--quiet", &source, &target]);
    git(path, &["config", "user.email", "test@test.com"]);
    git(path, &["config", "user.name", "Test User"]);
    git(path, &["config", "commit.gpgsign", "false"]);
}

/// Commits a new file in `path`, moving the branch ahead of its upstream.
///
/// # Panics
/// Panics if the commit fails.
pub fn commit_file(path: &Path, name: &str, content: &str) {
    fs::write(path.join(name), content)
        .unwrap_or_else(|e| panic!("commit_file: failed to write {name}: {e}"));
    git(path, &["add", name]);
    git(path, &["commit", "-m", &format!("Add {name}")]);
}
