//! Inspection and remediation against real repositories.

use std::time::Duration;

use lerian_git::{
    GitRunner, Inspector, Remediator, StatusCategory, StatusSummary, detect_operations,
    GitOperation, resolve_git_dir,
};
use lerian_test_utils::git::{
    clone_with_upstream, commit_file, git, real_git_repo_with_commit, simulate_merge_in_progress,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_clean_repository_has_clean_status() {
    let temp = TempDir::new().unwrap();
    real_git_repo_with_commit(temp.path());

    let inspector = Inspector::new(temp.path(), TIMEOUT);
    let summary = StatusSummary::from_records(inspector.status().await.unwrap());

    assert!(summary.is_clean());
    assert_eq!(inspector.stash_count().await.unwrap(), 0);
    assert_eq!(inspector.upstream().await.unwrap(), None);
}

#[tokio::test]
async fn test_status_categorizes_changes() {
    let temp = TempDir::new().unwrap();
    real_git_repo_with_commit(temp.path());
    std::fs::write(temp.path().join("README.md"), "# Edited").unwrap();
    std::fs::write(temp.path().join("staged.md"), "staged").unwrap();
    git(temp.path(), &["add", "staged.md"]);
    std::fs::create_dir_all(temp.path().join("docs")).unwrap();
    std::fs::write(temp.path().join("docs/new.md"), "new").unwrap();

    let inspector = Inspector::new(temp.path(), TIMEOUT);
    let summary = StatusSummary::from_records(inspector.status().await.unwrap());

    assert_eq!(summary.count(StatusCategory::Modified), 1);
    assert_eq!(summary.count(StatusCategory::Staged), 1);
    assert_eq!(summary.count(StatusCategory::Untracked), 1);
    assert!(summary.records.iter().any(|r| r.path == "docs/new.md"));
}

#[tokio::test]
async fn test_git2_fallback_matches_cli() {
    let temp = TempDir::new().unwrap();
    real_git_repo_with_commit(temp.path());
    std::fs::write(temp.path().join("README.md"), "# Edited").unwrap();
    std::fs::write(temp.path().join("extra.md"), "x").unwrap();

    let cli = Inspector::new(temp.path(), TIMEOUT);
    let fallback = Inspector::with_runner(
        temp.path(),
        GitRunner::new(temp.path(), TIMEOUT).with_program("definitely-not-a-real-binary"),
    );

    let mut from_cli = cli.status().await.unwrap();
    let mut from_git2 = fallback.status().await.unwrap();
    from_cli.sort_by(|a, b| a.path.cmp(&b.path));
    from_git2.sort_by(|a, b| a.path.cmp(&b.path));

    assert_eq!(from_cli, from_git2);
}

#[tokio::test]
async fn test_upstream_ahead_is_reported() {
    let temp = TempDir::new().unwrap();
    let origin = temp.path().join("origin");
    let clone = temp.path().join("clone");
    std::fs::create_dir_all(&origin).unwrap();
    real_git_repo_with_commit(&origin);
    clone_with_upstream(&origin, &clone);
    commit_file(&clone, "local.md", "ahead");

    let upstream = Inspector::new(&clone, TIMEOUT)
        .upstream()
        .await
        .unwrap()
        .expect("clone should track origin");

    assert_eq!(upstream.ahead, 1);
    assert_eq!(upstream.behind, 0);
    assert!(upstream.is_diverged());
}

#[tokio::test]
async fn test_commit_all_cleans_working_tree() {
    let temp = TempDir::new().unwrap();
    real_git_repo_with_commit(temp.path());
    std::fs::write(temp.path().join("pending.md"), "pending").unwrap();

    let runner = GitRunner::new(temp.path(), TIMEOUT);
    Remediator::new(runner.clone())
        .commit_all("chore: save work")
        .await
        .unwrap();

    let inspector = Inspector::with_runner(temp.path(), runner);
    assert!(StatusSummary::from_records(inspector.status().await.unwrap()).is_clean());
}

#[tokio::test]
async fn test_stash_moves_changes_aside() {
    let temp = TempDir::new().unwrap();
    real_git_repo_with_commit(temp.path());
    std::fs::write(temp.path().join("README.md"), "# Dirty").unwrap();
    std::fs::write(temp.path().join("untracked.md"), "u").unwrap();

    let runner = GitRunner::new(temp.path(), TIMEOUT);
    Remediator::new(runner.clone())
        .stash("sync")
        .await
        .unwrap();

    let inspector = Inspector::with_runner(temp.path(), runner);
    assert!(StatusSummary::from_records(inspector.status().await.unwrap()).is_clean());
    assert_eq!(inspector.stash_count().await.unwrap(), 1);
}

#[test]
fn test_merge_marker_detected_in_real_repo() {
    let temp = TempDir::new().unwrap();
    real_git_repo_with_commit(temp.path());
    simulate_merge_in_progress(temp.path());

    let git_dir = resolve_git_dir(temp.path()).unwrap();
    assert_eq!(detect_operations(&git_dir), vec![GitOperation::Merge]);
}
