use async_trait::async_trait;

use super::result::CheckResult;
use crate::Result;

/// A validator run by the [`SafetyCheckRunner`](super::SafetyCheckRunner).
///
/// Implementations report every finding, including their own internal
/// errors, as [`CheckResult`]s. `Err` is reserved for transient conditions
/// (timeouts, busy resources) that the runner should retry.
#[async_trait]
pub trait SafetyChecker: Send + Sync {
    fn id(&self) -> &str;

    /// Ids of checkers that must finish before this one starts.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    async fn perform_checks(&self) -> Result<Vec<CheckResult>>;
}
