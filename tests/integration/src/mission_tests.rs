//! Mission-based Integration Tests
//!
//! Each mission drives the full pipeline through `SyncEngine` against a real
//! git destination and an installed source tree:
//!
//! 1. a file only in the source is created
//! 2. a file only in the destination is deleted, with a backup
//! 3. equal mtimes but different content are still a modification
//! 4. an in-progress merge blocks the run with abort guidance
//! 5. a checker that never answers fails alone

mod common;

use std::time::Duration;

use common::{Hanging, engine, workspace};
use lerian_core::safety::CheckStatus;
use lerian_core::sync::BackupStore;
use lerian_core::{ChangeType, SyncOutcome, SyncRequest};
use lerian_test_utils::git::simulate_merge_in_progress;
use lerian_test_utils::tree::{days_ago, set_mtime};
use pretty_assertions::assert_eq;

// =============================================================================
// Mission 1: New file
// =============================================================================

#[tokio::test]
async fn mission_new_source_file_is_created() {
    let fixture = workspace();
    fixture.write_source("agents/a.md", "# Agent A");

    let outcome = engine(&fixture).build().run(SyncRequest::default()).await.unwrap();

    let SyncOutcome::Completed { analysis, apply, .. } = outcome else {
        panic!("expected a completed sync");
    };
    assert_eq!(analysis.changes.len(), 1);
    assert_eq!(analysis.changes[0].relative_path, "agents/a.md");
    assert_eq!(analysis.changes[0].change_type, ChangeType::New);
    assert_eq!(apply.applied_paths(), vec!["agents/a.md"]);
    fixture.assert_destination("agents/a.md", "# Agent A");
}

// =============================================================================
// Mission 2: Deleted file
// =============================================================================

#[tokio::test]
async fn mission_destination_only_file_is_deleted_with_backup() {
    let fixture = workspace();
    fixture.write_destination("agents/b.md", "# Agent B");
    common::commit_destination(&fixture);

    let outcome = engine(&fixture).build().run(SyncRequest::default()).await.unwrap();

    let SyncOutcome::Completed { analysis, apply, .. } = outcome else {
        panic!("expected a completed sync");
    };
    assert_eq!(analysis.count(ChangeType::Deleted), 1);
    assert_eq!(analysis.changes[0].relative_path, "agents/b.md");
    assert!(apply.is_success());
    fixture.assert_destination_missing("agents/b.md");

    let backups = BackupStore::new(fixture.destination())
        .list("agents/b.md")
        .await
        .unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(std::fs::read_to_string(&backups[0]).unwrap(), "# Agent B");
}

// =============================================================================
// Mission 3: Same mtime, different content
// =============================================================================

#[tokio::test]
async fn mission_equal_mtime_with_different_size_is_modified() {
    let fixture = workspace();
    let dest = fixture.write_destination("config.yaml", "name: old");
    common::commit_destination(&fixture);
    let source = fixture.write_source("config.yaml", "name: updated-config");
    let stamp = days_ago(3);
    set_mtime(&dest, stamp);
    set_mtime(&source, stamp);

    let outcome = engine(&fixture).build().run(SyncRequest::default()).await.unwrap();

    let SyncOutcome::Completed { analysis, .. } = outcome else {
        panic!("expected a completed sync");
    };
    assert_eq!(analysis.changes.len(), 1);
    assert_eq!(analysis.changes[0].relative_path, "config.yaml");
    assert_eq!(analysis.changes[0].change_type, ChangeType::Modified);
    fixture.assert_destination("config.yaml", "name: updated-config");
}

// =============================================================================
// Mission 4: Merge in progress
// =============================================================================

#[tokio::test]
async fn mission_merge_in_progress_blocks_with_guidance() {
    let fixture = workspace();
    fixture.write_source("agents/a.md", "# Agent A");
    simulate_merge_in_progress(&fixture.destination());

    let outcome = engine(&fixture).build().run(SyncRequest::default()).await.unwrap();

    let SyncOutcome::Blocked(report) = outcome else {
        panic!("expected the run to be blocked");
    };
    assert!(!report.can_proceed);
    assert_eq!(report.failed_ids(), vec!["git-operations"]);
    assert!(report.failed_checks[0].details[0].contains("git merge --abort"));
    fixture.assert_destination_missing("agents/a.md");
}

// =============================================================================
// Mission 5: Hanging checker
// =============================================================================

#[tokio::test]
async fn mission_timed_out_checker_fails_alone() {
    let fixture = workspace();
    let mut config = common::isolated_config(&fixture);
    config.runner.timeout_ms = 2_000;
    config.runner.max_retries = 2;
    config.runner.backoff_initial_ms = 10;

    let engine = lerian_core::SyncEngine::builder(fixture.destination())
        .config(config)
        .checker(Hanging)
        .build();
    let started = std::time::Instant::now();
    let report = engine.check().await;

    assert_eq!(report.failed_ids(), vec!["hanging"]);
    assert_eq!(report.failed_checks[0].metadata["attempts"], 2);
    assert_eq!(report.find("git-operations").unwrap().status, CheckStatus::Pass);
    assert_eq!(report.find("source-path").unwrap().status, CheckStatus::Pass);
    assert_eq!(report.find("destination-writable").unwrap().status, CheckStatus::Pass);
    assert!(started.elapsed() < Duration::from_secs(20));
}
