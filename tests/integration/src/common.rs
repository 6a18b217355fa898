//! Shared workspace setup for the end-to-end suites

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lerian_core::safety::{CheckResult, SafetyChecker, SourceConfig};
use lerian_core::sync::{FnHook, HookContext, HookRegistry, HookType, SyncPlugin};
use lerian_core::{EngineConfig, SyncEngine, SyncEngineBuilder};
use lerian_test_utils::git::{git, real_git_repo_with_commit};
use lerian_test_utils::tree::SyncFixture;

/// An installable source tree and a committed git destination.
///
/// The source carries the same `README.md` the destination was created
/// with, and the destination's sync rules exclude the package descriptor,
/// so a fresh workspace has nothing to sync.
pub fn workspace() -> SyncFixture {
    let fixture = SyncFixture::new();
    real_git_repo_with_commit(&fixture.destination());
    fixture.write_destination(
        ".lerian-sync-rules.json",
        r#"[{"type": "path", "pattern": "package.json", "action": "exclude"}]"#,
    );
    commit_destination(&fixture);

    fixture.make_installable_source("1.2.0");
    fixture.write_source("README.md", "# Test");
    fixture
}

pub fn commit_destination(fixture: &SyncFixture) {
    let dest = fixture.destination();
    git(&dest, &["add", "-A"]);
    git(&dest, &["commit", "-m", "Update fixture"]);
}

/// Config isolated from the machine: explicit source, no global lookups,
/// no free-space thresholds.
pub fn isolated_config(fixture: &SyncFixture) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.source = SourceConfig {
        explicit_path: Some(fixture.source()),
        metadata_file: Some(fixture.root().join("source-path.json")),
        default_locations: false,
        query_package_manager: false,
        max_ancestor_depth: 0,
        ..Default::default()
    };
    config.destination.min_free_bytes = 0;
    config.destination.warn_free_bytes = 0;
    config
}

pub fn engine(fixture: &SyncFixture) -> SyncEngineBuilder {
    SyncEngine::builder(fixture.destination()).config(isolated_config(fixture))
}

/// Records every hook invocation as `(hook, path)`.
#[derive(Clone, Default)]
pub struct HookRecorder {
    pub calls: Arc<Mutex<Vec<(HookType, Option<String>)>>>,
}

impl HookRecorder {
    pub fn fired(&self, hook_type: HookType) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == hook_type)
            .count()
    }
}

impl SyncPlugin for HookRecorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn register(&self, registry: &mut HookRegistry) {
        for hook_type in HookType::ALL {
            let calls = Arc::clone(&self.calls);
            registry.register(
                hook_type,
                format!("recorder:{hook_type}"),
                0,
                Arc::new(FnHook(move |t: HookType, ctx: &HookContext| -> lerian_core::Result<()> {
                    calls.lock().unwrap().push((t, ctx.path.clone()));
                    Ok(())
                })),
            );
        }
    }
}

/// A checker that never answers.
pub struct Hanging;

#[async_trait]
impl SafetyChecker for Hanging {
    fn id(&self) -> &str {
        "hanging"
    }

    async fn perform_checks(&self) -> lerian_core::Result<Vec<CheckResult>> {
        std::future::pending().await
    }
}
