//! End-to-end tests for the sync pipeline
//!
//! These exercise the complete flow: config -> safety -> analysis ->
//! selection -> apply, plus the collaborator and hook seams around it.

mod common;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use assert_fs::fixture::ChildPath;
use assert_fs::prelude::*;
use async_trait::async_trait;
use common::{HookRecorder, engine, isolated_config, workspace};
use lerian_core::collab::{Confirmation, Phase, Progress, ProgressEvent};
use lerian_core::safety::{
    CheckResult, CheckStatus, Decision, DecisionProvider, IssueCategory, RemedyOption,
};
use lerian_core::sync::audit::read_entries;
use lerian_core::sync::HookType;
use lerian_core::{FileChange, SyncEngine, SyncOutcome, SyncRequest};
use lerian_fs::SyncPath;
use predicates::prelude::*;
use pretty_assertions::assert_eq;

struct Decline;

#[async_trait]
impl Confirmation for Decline {
    async fn confirm(&self, _changes: &[FileChange]) -> bool {
        false
    }
}

#[derive(Clone, Default)]
struct Phases(Arc<Mutex<Vec<ProgressEvent>>>);

impl Progress for Phases {
    fn report(&self, event: ProgressEvent) {
        if matches!(event, ProgressEvent::PhaseStarted(_) | ProgressEvent::PhaseFinished(_)) {
            self.0.lock().unwrap().push(event);
        }
    }
}

/// Hands out a fixed source path when asked to locate one.
struct Locates(PathBuf);

#[async_trait]
impl DecisionProvider for Locates {
    async fn decide(&self, _: &CheckResult, category: IssueCategory, _: &[RemedyOption]) -> Decision {
        if category == IssueCategory::SourcePath {
            Decision::Select(0)
        } else {
            Decision::Skip
        }
    }

    async fn manual_source_path(&self, _: &CheckResult) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}

fn operations(fixture: &lerian_test_utils::tree::SyncFixture) -> Vec<String> {
    read_entries(&fixture.destination().join(SyncPath::AuditLog))
        .unwrap()
        .into_iter()
        .map(|e| e.operation)
        .collect()
}

#[tokio::test]
async fn test_fresh_workspace_is_up_to_date() {
    let fixture = workspace();

    let outcome = engine(&fixture).build().run(SyncRequest::default()).await.unwrap();

    let SyncOutcome::UpToDate { safety, analysis } = outcome else {
        panic!("expected nothing to sync");
    };
    assert!(safety.can_proceed);
    assert_eq!(safety.find("source-version").unwrap().status, CheckStatus::Pass);
    // README.md matches and package.json is excluded by the rules file
    assert_eq!(analysis.unchanged, 1);
    assert_eq!(analysis.filtered, 1);
    assert_eq!(operations(&fixture), vec!["analysis_started", "analysis_completed"]);
}

#[tokio::test]
async fn test_second_run_after_sync_is_up_to_date() {
    let fixture = workspace();
    fixture.write_source("agents/a.md", "# Agent A");
    fixture.write_source("docs/guide.md", "guide");

    let engine = engine(&fixture).build();
    let first = engine.run(SyncRequest::default()).await.unwrap();
    assert!(matches!(first, SyncOutcome::Completed { .. }));

    let second = engine.run(SyncRequest::default()).await.unwrap();
    let SyncOutcome::UpToDate { analysis, .. } = second else {
        panic!("expected the second run to find nothing");
    };
    assert_eq!(analysis.unchanged, 3);
    // Source digests come from the persisted cache on the second pass
    assert!(analysis.stats.files_hashed <= 1);
}

#[tokio::test]
async fn test_dry_run_reports_without_writing() {
    let fixture = workspace();
    fixture.write_source("agents/a.md", "# Agent A");
    let recorder = HookRecorder::default();

    let outcome = engine(&fixture)
        .plugin(recorder.clone())
        .build()
        .run(SyncRequest { dry_run: true })
        .await
        .unwrap();

    let SyncOutcome::Completed { apply, .. } = outcome else {
        panic!("expected a completed dry run");
    };
    assert!(apply.dry_run);
    assert_eq!(apply.applied_paths(), vec!["agents/a.md"]);
    ChildPath::new(fixture.destination().join("agents/a.md")).assert(predicate::path::missing());
    ChildPath::new(fixture.destination().join(SyncPath::BackupsDir)).assert(predicate::path::missing());

    assert_eq!(recorder.fired(HookType::BeforeSync), 1);
    assert_eq!(recorder.fired(HookType::BeforeOperation), 1);
    assert_eq!(recorder.fired(HookType::AfterOperation), 1);
    assert_eq!(recorder.fired(HookType::AfterSync), 1);
    assert_eq!(recorder.fired(HookType::OnComplete), 1);
    assert_eq!(recorder.fired(HookType::OnCancel), 0);
}

#[tokio::test]
async fn test_declined_confirmation_cancels() {
    let fixture = workspace();
    fixture.write_source("agents/a.md", "# Agent A");
    let recorder = HookRecorder::default();

    let outcome = engine(&fixture)
        .confirmation(Decline)
        .plugin(recorder.clone())
        .build()
        .run(SyncRequest::default())
        .await
        .unwrap();

    assert!(matches!(outcome, SyncOutcome::Cancelled { .. }));
    fixture.assert_destination_missing("agents/a.md");
    assert_eq!(recorder.fired(HookType::OnCancel), 1);
    assert_eq!(recorder.fired(HookType::BeforeOperation), 0);
    assert!(operations(&fixture).contains(&"sync_cancelled".to_string()));
}

#[tokio::test]
async fn test_phases_are_reported_in_order() {
    let fixture = workspace();
    fixture.write_source("agents/a.md", "# Agent A");
    let phases = Phases::default();

    engine(&fixture)
        .progress(phases.clone())
        .build()
        .run(SyncRequest::default())
        .await
        .unwrap();

    let expected: Vec<ProgressEvent> = [Phase::Safety, Phase::Analysis, Phase::Selection, Phase::Apply]
        .into_iter()
        .flat_map(|p| [ProgressEvent::PhaseStarted(p), ProgressEvent::PhaseFinished(p)])
        .collect();
    assert_eq!(*phases.0.lock().unwrap(), expected);
}

#[tokio::test]
async fn test_missing_source_blocks_with_searched_paths() {
    let fixture = workspace();
    let mut config = isolated_config(&fixture);
    config.source.explicit_path = Some(fixture.root().join("nowhere"));

    let outcome = SyncEngine::builder(fixture.destination())
        .config(config)
        .build()
        .run(SyncRequest::default())
        .await
        .unwrap();

    let SyncOutcome::Blocked(report) = outcome else {
        panic!("expected the run to be blocked");
    };
    assert_eq!(report.failed_ids(), vec!["source-path"]);
    assert!(report.failed_checks[0].details.iter().any(|d| d.contains("nowhere")));
}

#[tokio::test]
async fn test_manual_source_path_resolves_and_reruns() {
    let fixture = workspace();
    let mut config = isolated_config(&fixture);
    config.source.explicit_path = None;

    let outcome = SyncEngine::builder(fixture.destination())
        .config(config)
        .decisions(Locates(fixture.source()))
        .build()
        .run(SyncRequest::default())
        .await
        .unwrap();

    let safety = outcome.safety();
    assert!(safety.can_proceed);
    assert_eq!(safety.resolutions.len(), 1);
    assert!(safety.resolutions[0].resolved, "{}", safety.resolutions[0].message);
    assert_eq!(safety.find("source-path").unwrap().path.as_ref(), Some(&fixture.source()));
    assert!(matches!(outcome, SyncOutcome::UpToDate { .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_configured_command_hook_runs_after_sync() {
    use lerian_core::sync::HookConfig;

    let fixture = workspace();
    fixture.write_source("agents/a.md", "# Agent A");
    let mut config = isolated_config(&fixture);
    config.hooks.push(HookConfig {
        event: HookType::AfterSync,
        command: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            "printf '%s' \"$SYNC_SOURCE\" > ${SYNC_DESTINATION}/hook-ran.txt".to_string(),
        ],
        working_dir: None,
        priority: 0,
    });

    SyncEngine::builder(fixture.destination())
        .config(config)
        .build()
        .run(SyncRequest::default())
        .await
        .unwrap();

    let written = std::fs::read_to_string(fixture.destination().join("hook-ran.txt")).unwrap();
    assert_eq!(PathBuf::from(written), fixture.source());
}
