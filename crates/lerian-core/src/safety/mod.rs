//! Pre-sync safety gate
//!
//! Checkers inspect the destination's git state, the source tree and the
//! destination filesystem. The [`SafetyCheckRunner`] aggregates their
//! results into a [`SafetyReport`]; nothing destructive runs unless
//! `can_proceed` is true.

pub mod checker;
pub mod destination;
pub mod git;
pub mod resolver;
pub mod result;
pub mod runner;
pub mod source;

pub use checker::SafetyChecker;
pub use destination::{DESTINATION_CHECKER_ID, DestinationConfig, DestinationValidator};
pub use git::{GIT_CHECKER_ID, GitChecker};
pub use resolver::{
    Decision, DecisionProvider, DeclineAll, DefaultResolutionContext, IssueCategory,
    RemedyAction, RemedyOption, ResolutionContext, ResolutionOutcome, SafetyResolver,
};
pub use result::{CheckResult, CheckStatus, CheckSummary, SafetyReport};
pub use runner::{MAX_RETRY_DELAY, RUNNER_ERROR_ID, RunnerConfig, RunnerState, SafetyCheckRunner};
pub use source::{
    DetectedSource, DetectionMethod, SourceChecker, SourceConfig, SourceMetadata,
    SourcePathDetector,
};
