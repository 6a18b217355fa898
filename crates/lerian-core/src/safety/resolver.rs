//! Interactive resolution of blocking and warning safety results
//!
//! [`SafetyResolver::options_for`] is a pure function from an issue to the
//! remedies on offer. Choosing among them and carrying them out is delegated
//! to a [`ResolutionContext`], so the same resolver serves terminal prompts,
//! scripted CI policies and tests.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use lerian_git::{DEFAULT_REMEDY_MESSAGE, GitOperation, Remediator};

use super::result::{CheckResult, CheckStatus};
use super::source::SourcePathDetector;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCategory {
    Git,
    SourcePath,
    Permission,
    DiskSpace,
    Generic,
}

impl IssueCategory {
    pub fn of(issue: &CheckResult) -> Self {
        match issue.id.as_str() {
            id if id.starts_with("git-") => Self::Git,
            id if id.starts_with("source-") => Self::SourcePath,
            "destination-writable" => Self::Permission,
            "destination-disk-space" => Self::DiskSpace,
            _ => Self::Generic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RemedyAction {
    CommitChanges { message: String },
    StashChanges { message: String },
    AbortOperation { operation: GitOperation },
    ProvideSourcePath,
    AddOwnerWrite { path: PathBuf },
    Acknowledge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemedyOption {
    pub action: RemedyAction,
    pub label: String,
    pub description: String,
}

impl RemedyOption {
    fn new(action: RemedyAction, label: &str, description: impl Into<String>) -> Self {
        Self {
            action,
            label: label.to_string(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Index into the offered options
    Select(usize),
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutcome {
    pub check_id: String,
    pub resolved: bool,
    pub skipped: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<RemedyAction>,
}

impl ResolutionOutcome {
    fn skipped(issue: &CheckResult, message: impl Into<String>) -> Self {
        Self {
            check_id: issue.id.clone(),
            resolved: false,
            skipped: true,
            message: message.into(),
            action: None,
        }
    }

    /// Whether the environment changed so checks must run again.
    pub fn requires_rerun(&self) -> bool {
        self.resolved && !matches!(self.action, None | Some(RemedyAction::Acknowledge))
    }
}

/// Chooses and carries out remedies.
#[async_trait]
pub trait ResolutionContext: Send + Sync {
    async fn choose(
        &self,
        issue: &CheckResult,
        category: IssueCategory,
        options: &[RemedyOption],
    ) -> Decision;

    /// Perform `action`, returning a short description of what was done.
    async fn execute(&self, issue: &CheckResult, action: &RemedyAction) -> Result<String>;
}

/// The decision half of a [`ResolutionContext`], e.g. a terminal prompt.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(
        &self,
        issue: &CheckResult,
        category: IssueCategory,
        options: &[RemedyOption],
    ) -> Decision;

    /// Ask for a source tree location after detection failed.
    async fn manual_source_path(&self, _issue: &CheckResult) -> Option<PathBuf> {
        None
    }
}

/// Declines every remedy. The non-interactive default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclineAll;

#[async_trait]
impl DecisionProvider for DeclineAll {
    async fn decide(&self, _: &CheckResult, _: IssueCategory, _: &[RemedyOption]) -> Decision {
        Decision::Skip
    }
}

/// Executes remedies with git remediation commands, the source detector and
/// filesystem permission changes.
pub struct DefaultResolutionContext<D> {
    decisions: D,
    remediator: Option<Remediator>,
    source: Option<Arc<SourcePathDetector>>,
}

impl<D: DecisionProvider> DefaultResolutionContext<D> {
    pub fn new(decisions: D) -> Self {
        Self {
            decisions,
            remediator: None,
            source: None,
        }
    }

    pub fn with_remediator(mut self, remediator: Remediator) -> Self {
        self.remediator = Some(remediator);
        self
    }

    pub fn with_source_detector(mut self, detector: Arc<SourcePathDetector>) -> Self {
        self.source = Some(detector);
        self
    }

    fn remediator(&self) -> Result<&Remediator> {
        self.remediator.as_ref().ok_or_else(|| Error::Resolution {
            message: "git remediation is not available for this destination".to_string(),
        })
    }
}

#[async_trait]
impl<D: DecisionProvider> ResolutionContext for DefaultResolutionContext<D> {
    async fn choose(
        &self,
        issue: &CheckResult,
        category: IssueCategory,
        options: &[RemedyOption],
    ) -> Decision {
        self.decisions.decide(issue, category, options).await
    }

    async fn execute(&self, issue: &CheckResult, action: &RemedyAction) -> Result<String> {
        match action {
            RemedyAction::CommitChanges { message } => {
                self.remediator()?.commit_all(message).await?;
                Ok("Committed pending changes".to_string())
            }
            RemedyAction::StashChanges { message } => {
                self.remediator()?.stash(message).await?;
                Ok("Stashed pending changes".to_string())
            }
            RemedyAction::AbortOperation { operation } => {
                self.remediator()?.abort(*operation).await?;
                Ok(format!("Aborted the in-progress {operation}"))
            }
            RemedyAction::ProvideSourcePath => {
                let detector = self.source.as_ref().ok_or_else(|| Error::Resolution {
                    message: "no source detector to record the path with".to_string(),
                })?;
                let path = self
                    .decisions
                    .manual_source_path(issue)
                    .await
                    .ok_or_else(|| Error::Resolution {
                        message: "no source path was supplied".to_string(),
                    })?;
                let detected = detector.set_manual(&path)?;
                Ok(format!("Using source tree at {}", detected.path.display()))
            }
            RemedyAction::AddOwnerWrite { path } => {
                add_owner_write(path).await?;
                Ok(format!("Granted owner write permission on {}", path.display()))
            }
            RemedyAction::Acknowledge => Ok("Acknowledged".to_string()),
        }
    }
}

#[cfg(unix)]
async fn add_owner_write(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = tokio::fs::metadata(path).await?.permissions();
    permissions.set_mode(permissions.mode() | 0o200);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn add_owner_write(path: &std::path::Path) -> Result<()> {
    let mut permissions = tokio::fs::metadata(path).await?.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

pub struct SafetyResolver {
    context: Arc<dyn ResolutionContext>,
}

impl SafetyResolver {
    pub fn new(context: Arc<dyn ResolutionContext>) -> Self {
        Self { context }
    }

    /// Remedies on offer for `issue`. Acknowledging is never offered for a
    /// failing check.
    pub fn options_for(issue: &CheckResult, category: IssueCategory) -> Vec<RemedyOption> {
        let mut options = Vec::new();
        match (category, issue.id.as_str()) {
            (IssueCategory::Git, "git-operations") => {
                let operations = issue
                    .metadata
                    .get("operations")
                    .and_then(|v| v.as_array())
                    .into_iter()
                    .flatten()
                    .filter_map(|v| v.as_str().and_then(GitOperation::parse));
                for operation in operations {
                    options.push(RemedyOption::new(
                        RemedyAction::AbortOperation { operation },
                        "Abort",
                        format!("Run `git {}`", operation.abort_args().join(" ")),
                    ));
                }
            }
            (IssueCategory::Git, "git-status") if issue.status == CheckStatus::Warn => {
                options.push(RemedyOption::new(
                    RemedyAction::CommitChanges {
                        message: DEFAULT_REMEDY_MESSAGE.to_string(),
                    },
                    "Commit",
                    "Stage and commit every pending change",
                ));
                options.push(RemedyOption::new(
                    RemedyAction::StashChanges {
                        message: DEFAULT_REMEDY_MESSAGE.to_string(),
                    },
                    "Stash",
                    "Stash pending changes, including untracked files",
                ));
            }
            (IssueCategory::SourcePath, "source-path") => {
                options.push(RemedyOption::new(
                    RemedyAction::ProvideSourcePath,
                    "Locate",
                    "Enter the path of the installed source tree",
                ));
            }
            (IssueCategory::Permission, _) => {
                if let Some(path) = &issue.path {
                    options.push(RemedyOption::new(
                        RemedyAction::AddOwnerWrite { path: path.clone() },
                        "Grant write",
                        format!("Add owner write permission to {}", path.display()),
                    ));
                }
            }
            _ => {}
        }
        if issue.status != CheckStatus::Fail {
            options.push(RemedyOption::new(
                RemedyAction::Acknowledge,
                "Continue",
                "Acknowledge the warning and continue",
            ));
        }
        options
    }

    pub async fn resolve(&self, issue: &CheckResult) -> ResolutionOutcome {
        let category = IssueCategory::of(issue);
        let options = Self::options_for(issue, category);
        if options.is_empty() {
            return ResolutionOutcome::skipped(issue, "No automatic remedy");
        }

        let choice = match self.context.choose(issue, category, &options).await {
            Decision::Skip => return ResolutionOutcome::skipped(issue, "Skipped"),
            Decision::Select(index) => match options.get(index) {
                Some(option) => option,
                None => return ResolutionOutcome::skipped(issue, "Invalid choice"),
            },
        };

        match self.context.execute(issue, &choice.action).await {
            Ok(message) => {
                tracing::info!(check = %issue.id, action = %choice.label, "Resolved safety issue");
                ResolutionOutcome {
                    check_id: issue.id.clone(),
                    resolved: true,
                    skipped: false,
                    message,
                    action: Some(choice.action.clone()),
                }
            }
            Err(e) => {
                tracing::warn!(check = %issue.id, error = %e, "Remedy failed");
                ResolutionOutcome {
                    check_id: issue.id.clone(),
                    resolved: false,
                    skipped: false,
                    message: e.to_string(),
                    action: Some(choice.action.clone()),
                }
            }
        }
    }

    /// Resolve issues one at a time; remedies may touch the same tree.
    pub async fn resolve_all(&self, issues: &[CheckResult]) -> Vec<ResolutionOutcome> {
        let mut outcomes = Vec::with_capacity(issues.len());
        for issue in issues {
            outcomes.push(self.resolve(issue).await);
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    /// Picks a fixed option index and records every executed action.
    struct Scripted {
        pick: Option<usize>,
        executed: Mutex<Vec<RemedyAction>>,
        fail: bool,
    }

    impl Scripted {
        fn new(pick: Option<usize>) -> Self {
            Self {
                pick,
                executed: Mutex::new(Vec::new()),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl ResolutionContext for Scripted {
        async fn choose(&self, _: &CheckResult, _: IssueCategory, _: &[RemedyOption]) -> Decision {
            self.pick.map_or(Decision::Skip, Decision::Select)
        }

        async fn execute(&self, _: &CheckResult, action: &RemedyAction) -> Result<String> {
            self.executed.lock().unwrap().push(action.clone());
            if self.fail {
                return Err(Error::Resolution {
                    message: "nope".to_string(),
                });
            }
            Ok("done".to_string())
        }
    }

    fn merge_issue() -> CheckResult {
        CheckResult::fail("git-operations", "Git merge in progress")
            .with_metadata("operations", json!(["merge"]))
    }

    fn render(options: &[RemedyOption]) -> String {
        options
            .iter()
            .enumerate()
            .map(|(i, o)| format!("{}. {}: {}", i + 1, o.label, o.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn categories_follow_check_ids() {
        let category = |id: &str| IssueCategory::of(&CheckResult::fail(id, ""));
        assert_eq!(category("git-status"), IssueCategory::Git);
        assert_eq!(category("source-path"), IssueCategory::SourcePath);
        assert_eq!(category("destination-writable"), IssueCategory::Permission);
        assert_eq!(category("destination-disk-space"), IssueCategory::DiskSpace);
        assert_eq!(category("runner-error"), IssueCategory::Generic);
    }

    #[test]
    fn git_warning_options_render() {
        let issue = CheckResult::warn("git-status", "2 uncommitted change(s)");
        let options = SafetyResolver::options_for(&issue, IssueCategory::Git);
        insta::assert_snapshot!(render(&options), @r"
        1. Commit: Stage and commit every pending change
        2. Stash: Stash pending changes, including untracked files
        3. Continue: Acknowledge the warning and continue
        ");
    }

    #[test]
    fn failing_issue_is_never_acknowledgeable() {
        let options = SafetyResolver::options_for(&merge_issue(), IssueCategory::Git);
        assert_eq!(
            options.iter().map(|o| &o.action).collect::<Vec<_>>(),
            vec![&RemedyAction::AbortOperation {
                operation: GitOperation::Merge
            }]
        );

        let disk = CheckResult::fail("destination-disk-space", "full");
        assert!(SafetyResolver::options_for(&disk, IssueCategory::DiskSpace).is_empty());
    }

    #[tokio::test]
    async fn no_options_is_skipped() {
        let resolver = SafetyResolver::new(Arc::new(Scripted::new(Some(0))));
        let outcome = resolver
            .resolve(&CheckResult::fail("destination-disk-space", "full"))
            .await;
        assert!(outcome.skipped);
        assert_eq!(outcome.message, "No automatic remedy");
    }

    #[tokio::test]
    async fn selected_action_is_executed() {
        let context = Arc::new(Scripted::new(Some(0)));
        let resolver = SafetyResolver::new(context.clone());

        let outcome = resolver.resolve(&merge_issue()).await;

        assert!(outcome.resolved);
        assert!(outcome.requires_rerun());
        assert_eq!(
            *context.executed.lock().unwrap(),
            vec![RemedyAction::AbortOperation {
                operation: GitOperation::Merge
            }]
        );
    }

    #[tokio::test]
    async fn acknowledge_does_not_require_rerun() {
        let resolver = SafetyResolver::new(Arc::new(Scripted::new(Some(2))));
        let outcome = resolver
            .resolve(&CheckResult::warn("git-status", "dirty"))
            .await;
        assert!(outcome.resolved);
        assert_eq!(outcome.action, Some(RemedyAction::Acknowledge));
        assert!(!outcome.requires_rerun());
    }

    #[tokio::test]
    async fn skip_and_out_of_range_choices_are_skipped() {
        let skip = SafetyResolver::new(Arc::new(Scripted::new(None)));
        assert!(skip.resolve(&merge_issue()).await.skipped);

        let out_of_range = SafetyResolver::new(Arc::new(Scripted::new(Some(9))));
        let outcome = out_of_range.resolve(&merge_issue()).await;
        assert!(outcome.skipped);
        assert_eq!(outcome.message, "Invalid choice");
    }

    #[tokio::test]
    async fn failed_remedy_is_neither_resolved_nor_skipped() {
        let mut context = Scripted::new(Some(0));
        context.fail = true;
        let resolver = SafetyResolver::new(Arc::new(context));

        let outcome = resolver.resolve(&merge_issue()).await;

        assert!(!outcome.resolved);
        assert!(!outcome.skipped);
        assert!(outcome.message.contains("nope"));
    }

    #[tokio::test]
    async fn decline_all_skips_everything() {
        let resolver = SafetyResolver::new(Arc::new(DefaultResolutionContext::new(DeclineAll)));
        let outcomes = resolver
            .resolve_all(&[merge_issue(), CheckResult::warn("git-status", "dirty")])
            .await;
        assert!(outcomes.iter().all(|o| o.skipped));
    }

    #[tokio::test]
    async fn commit_remedy_cleans_the_working_tree() {
        use lerian_git::GitRunner;
        use lerian_test_utils::git::{git, real_git_repo_with_commit};
        use std::time::Duration;

        let temp = tempfile::tempdir().unwrap();
        real_git_repo_with_commit(temp.path());
        std::fs::write(temp.path().join("notes.md"), "n").unwrap();

        let context = DefaultResolutionContext::new(DeclineAll).with_remediator(Remediator::new(
            GitRunner::new(temp.path(), Duration::from_secs(30)),
        ));
        let message = context
            .execute(
                &CheckResult::warn("git-status", "dirty"),
                &RemedyAction::CommitChanges {
                    message: DEFAULT_REMEDY_MESSAGE.to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(message, "Committed pending changes");
        assert_eq!(git(temp.path(), &["status", "--porcelain"]), "");
    }

    #[tokio::test]
    async fn manual_source_path_is_validated_and_recorded() {
        use super::super::source::SourceConfig;
        use lerian_test_utils::tree::SyncFixture;

        struct Supplies(PathBuf);

        #[async_trait]
        impl DecisionProvider for Supplies {
            async fn decide(&self, _: &CheckResult, _: IssueCategory, _: &[RemedyOption]) -> Decision {
                Decision::Select(0)
            }

            async fn manual_source_path(&self, _: &CheckResult) -> Option<PathBuf> {
                Some(self.0.clone())
            }
        }

        let fixture = SyncFixture::new();
        fixture.make_installable_source("1.0.0");
        let detector = Arc::new(SourcePathDetector::new(
            SourceConfig {
                metadata_file: Some(fixture.root().join("source-path.json")),
                default_locations: false,
                query_package_manager: false,
                ..Default::default()
            },
            fixture.destination(),
        ));
        let context = DefaultResolutionContext::new(Supplies(fixture.source()))
            .with_source_detector(detector.clone());
        let resolver = SafetyResolver::new(Arc::new(context));

        let outcome = resolver
            .resolve(&CheckResult::fail("source-path", "not found"))
            .await;

        assert!(outcome.resolved, "{}", outcome.message);
        assert_eq!(detector.detect().await.unwrap().path, fixture.source());
    }
}
