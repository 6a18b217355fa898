//! SyncEngine: the safety-gated sync pipeline
//!
//! One run goes through four phases:
//!
//! 1. **safety**: every checker runs; a failing report stops here
//! 2. **analysis**: the source tree is compared with the destination
//! 3. **selection**: collaborators pick and confirm the changes
//! 4. **apply**: the confirmed changes are written with backups
//!
//! Lifecycle hooks fire around each step and every decision is audited.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;

use lerian_fs::FileSystemOps;
use lerian_git::{GitRunner, Remediator};

use crate::collab::{AutoApprove, Confirmation, Phase, Progress, ProgressEvent, Selection, TracingProgress};
use crate::config::EngineConfig;
use crate::safety::{
    DecisionProvider, DefaultResolutionContext, DestinationValidator, GIT_CHECKER_ID, GitChecker,
    ResolutionContext, SafetyCheckRunner, SafetyChecker, SafetyReport, SafetyResolver,
    SourceChecker, SourcePathDetector,
};
use crate::sync::audit::AuditResult;
use crate::sync::hooks::register_command_hooks;
use crate::sync::{
    AnalysisReport, ApplyOptions, ApplyReport, HookContext, HookType, IncrementalSyncAnalyzer,
    RuleContext, SyncApplier, SyncPlugin,
};
use crate::{Error, Result};

/// Options for a single run
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    /// Report what would change without writing; also honoured when set in
    /// the `[apply]` config section
    pub dry_run: bool,
}

/// How a run ended
#[derive(Debug)]
pub enum SyncOutcome {
    /// Safety checks failed; nothing was analysed or written
    Blocked(SafetyReport),
    /// Source and destination already match
    UpToDate {
        safety: SafetyReport,
        analysis: AnalysisReport,
    },
    /// Nothing was selected, or the confirmation was declined
    Cancelled {
        safety: SafetyReport,
        analysis: AnalysisReport,
    },
    Completed {
        safety: SafetyReport,
        analysis: AnalysisReport,
        apply: ApplyReport,
    },
}

impl SyncOutcome {
    pub fn safety(&self) -> &SafetyReport {
        match self {
            Self::Blocked(safety)
            | Self::UpToDate { safety, .. }
            | Self::Cancelled { safety, .. }
            | Self::Completed { safety, .. } => safety,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

pub struct SyncEngineBuilder {
    destination: PathBuf,
    config: EngineConfig,
    start_dir: Option<PathBuf>,
    selection: Arc<dyn Selection>,
    confirmation: Arc<dyn Confirmation>,
    progress: Arc<dyn Progress>,
    resolution: Option<Resolution>,
    plugins: Vec<Arc<dyn SyncPlugin>>,
    checkers: Vec<Arc<dyn SafetyChecker>>,
}

enum Resolution {
    Context(Arc<dyn ResolutionContext>),
    Decisions(Box<dyn FnOnce(Remediator, Arc<SourcePathDetector>) -> Arc<dyn ResolutionContext> + Send>),
}

impl SyncEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `path` as the source tree instead of detecting one.
    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.source.explicit_path = Some(path.into());
        self
    }

    /// Directory the source search starts from; defaults to the destination.
    pub fn start_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.start_dir = Some(dir.into());
        self
    }

    pub fn selection(mut self, selection: impl Selection + 'static) -> Self {
        self.selection = Arc::new(selection);
        self
    }

    pub fn confirmation(mut self, confirmation: impl Confirmation + 'static) -> Self {
        self.confirmation = Arc::new(confirmation);
        self
    }

    pub fn progress(mut self, progress: impl Progress + 'static) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    /// Resolve blocked safety reports through a custom context.
    pub fn resolution_context(mut self, context: Arc<dyn ResolutionContext>) -> Self {
        self.resolution = Some(Resolution::Context(context));
        self
    }

    /// Resolve blocked safety reports with the built-in remedies, asking
    /// `decisions` which one to take.
    pub fn decisions<D: DecisionProvider + 'static>(mut self, decisions: D) -> Self {
        self.resolution = Some(Resolution::Decisions(Box::new(move |remediator, detector| {
            Arc::new(
                DefaultResolutionContext::new(decisions)
                    .with_remediator(remediator)
                    .with_source_detector(detector),
            )
        })));
        self
    }

    pub fn plugin(mut self, plugin: impl SyncPlugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Register an additional safety checker next to the built-in ones.
    pub fn checker(mut self, checker: impl SafetyChecker + 'static) -> Self {
        self.checkers.push(Arc::new(checker));
        self
    }

    pub fn build(self) -> SyncEngine {
        let config = self.config;
        let fs = Arc::new(FileSystemOps::new(config.fs.clone()));
        let start_dir = self.start_dir.unwrap_or_else(|| self.destination.clone());
        let source_detector = Arc::new(SourcePathDetector::new(config.source.clone(), start_dir));

        let mut runner = SafetyCheckRunner::new(config.runner.clone());
        runner.register(Arc::new(GitChecker::new(
            &self.destination,
            config.git.command_timeout(),
        )));
        runner.register(Arc::new(SourceChecker::new(Arc::clone(&source_detector))));
        runner.register(Arc::new(
            DestinationValidator::new(&self.destination, Arc::clone(&fs), config.destination.clone())
                .after(GIT_CHECKER_ID),
        ));
        for checker in self.checkers {
            runner.register(checker);
        }

        let resolver = self.resolution.map(|resolution| {
            let context = match resolution {
                Resolution::Context(context) => context,
                Resolution::Decisions(make) => make(
                    Remediator::new(GitRunner::new(&self.destination, config.git.command_timeout())),
                    Arc::clone(&source_detector),
                ),
            };
            SafetyResolver::new(context)
        });

        SyncEngine {
            destination: self.destination,
            config,
            fs,
            source_detector,
            runner,
            resolver,
            selection: self.selection,
            confirmation: self.confirmation,
            progress: self.progress,
            plugins: self.plugins,
        }
    }
}

pub struct SyncEngine {
    destination: PathBuf,
    config: EngineConfig,
    fs: Arc<FileSystemOps>,
    source_detector: Arc<SourcePathDetector>,
    runner: SafetyCheckRunner,
    resolver: Option<SafetyResolver>,
    selection: Arc<dyn Selection>,
    confirmation: Arc<dyn Confirmation>,
    progress: Arc<dyn Progress>,
    plugins: Vec<Arc<dyn SyncPlugin>>,
}

impl SyncEngine {
    /// Start configuring an engine that syncs into `destination`.
    ///
    /// Defaults: [`EngineConfig::default`], [`AutoApprove`] selection and
    /// confirmation, [`TracingProgress`], and no resolution.
    pub fn builder(destination: impl Into<PathBuf>) -> SyncEngineBuilder {
        SyncEngineBuilder {
            destination: destination.into(),
            config: EngineConfig::default(),
            start_dir: None,
            selection: Arc::new(AutoApprove),
            confirmation: Arc::new(AutoApprove),
            progress: Arc::new(TracingProgress),
            resolution: None,
            plugins: Vec::new(),
            checkers: Vec::new(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runner(&self) -> &SafetyCheckRunner {
        &self.runner
    }

    pub fn source_detector(&self) -> &Arc<SourcePathDetector> {
        &self.source_detector
    }

    /// Run only the safety phase.
    pub async fn check(&self) -> SafetyReport {
        self.progress.report(ProgressEvent::PhaseStarted(Phase::Safety));
        let report = self.runner.run(self.resolver.as_ref()).await;
        self.progress.report(ProgressEvent::PhaseFinished(Phase::Safety));
        report
    }

    /// Run the whole pipeline.
    ///
    /// # Errors
    ///
    /// Fails when the analysis cannot read the trees or the rules file is
    /// invalid. Blocked safety checks and per-file apply failures are
    /// reported through the [`SyncOutcome`] instead.
    pub async fn run(&self, request: SyncRequest) -> Result<SyncOutcome> {
        let safety = self.check().await;
        if !safety.can_proceed {
            tracing::warn!(failed = ?safety.failed_ids(), "Sync blocked by safety checks");
            return Ok(SyncOutcome::Blocked(safety));
        }

        let source = safety
            .find("source-path")
            .and_then(|r| r.path.clone())
            .ok_or_else(|| Error::SourceUnavailable {
                message: "the safety report did not name a source tree".to_string(),
            })?;
        let dry_run = request.dry_run || self.config.apply.dry_run;
        let session_id = uuid::Uuid::new_v4().to_string();

        let mut analyzer = IncrementalSyncAnalyzer::new(
            Arc::clone(&self.fs),
            source.clone(),
            self.destination.clone(),
            self.config.analyzer.clone(),
            &session_id,
        )?;
        register_command_hooks(analyzer.hooks_mut(), &self.config.hooks);
        for plugin in &self.plugins {
            analyzer.install_plugin(plugin.as_ref());
        }
        let ctx = HookContext::new(&session_id, &source, &self.destination);
        tracing::info!(session = %session_id, source = %source.display(), destination = %self.destination.display(), dry_run, "Starting sync");

        analyzer.execute_hooks(HookType::BeforeSync, &ctx).await;

        self.progress.report(ProgressEvent::PhaseStarted(Phase::Analysis));
        let rule_ctx = RuleContext::current(self.config.analyzer.strategy, dry_run);
        let analysis = match analyzer.analyze(&rule_ctx).await {
            Ok(analysis) => analysis,
            Err(e) => {
                analyzer
                    .execute_hooks(HookType::OnError, &ctx.with_error(&e))
                    .await;
                return Err(e);
            }
        };
        self.progress.report(ProgressEvent::PhaseFinished(Phase::Analysis));

        if analysis.is_empty() {
            analyzer.execute_hooks(HookType::AfterSync, &ctx).await;
            analyzer.execute_hooks(HookType::OnComplete, &ctx).await;
            tracing::info!(unchanged = analysis.unchanged, "Destination is up to date");
            return Ok(SyncOutcome::UpToDate { safety, analysis });
        }

        self.progress.report(ProgressEvent::PhaseStarted(Phase::Selection));
        let selected = self.selection.select(analysis.changes.clone()).await;
        let confirmed = !selected.is_empty() && self.confirmation.confirm(&selected).await;
        self.progress.report(ProgressEvent::PhaseFinished(Phase::Selection));

        if !confirmed {
            analyzer.execute_hooks(HookType::OnCancel, &ctx).await;
            analyzer
                .audit()
                .record(
                    "sync_cancelled",
                    json!({ "detected": analysis.changes.len(), "selected": selected.len() }),
                    AuditResult::Skipped,
                )
                .await;
            tracing::info!(selected = selected.len(), "Sync cancelled");
            return Ok(SyncOutcome::Cancelled { safety, analysis });
        }

        self.progress.report(ProgressEvent::PhaseStarted(Phase::Apply));
        let applier = SyncApplier::new(
            Arc::clone(&self.fs),
            ApplyOptions {
                dry_run,
                ..self.config.apply.clone()
            },
        );
        let apply = applier
            .apply(&safety, &selected, &analyzer, &ctx, self.progress.as_ref())
            .await?;
        self.progress.report(ProgressEvent::PhaseFinished(Phase::Apply));

        if !dry_run {
            // The destination changed under the cached report
            self.runner.invalidate();
        }
        analyzer.execute_hooks(HookType::AfterSync, &ctx).await;
        analyzer.execute_hooks(HookType::OnComplete, &ctx).await;
        analyzer
            .audit()
            .record(
                "sync_completed",
                json!({
                    "applied": apply.applied.len(),
                    "skipped": apply.skipped.len(),
                    "failed": apply.failed.len(),
                    "dryRun": dry_run,
                }),
                if apply.is_success() {
                    AuditResult::Success
                } else {
                    AuditResult::Failure
                },
            )
            .await;

        Ok(SyncOutcome::Completed {
            safety,
            analysis,
            apply,
        })
    }
}
