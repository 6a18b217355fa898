//! Check results and the aggregated safety report

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::resolver::ResolutionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Pending,
    Info,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Pending => "pending",
            Self::Info => "info",
        };
        f.write_str(name)
    }
}

/// One finding of a safety checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub id: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl CheckResult {
    pub fn new(id: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            message: message.into(),
            details: Vec::new(),
            path: None,
            metadata: Map::new(),
        }
    }

    pub fn pass(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, CheckStatus::Pass, message)
    }

    pub fn warn(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, CheckStatus::Warn, message)
    }

    pub fn fail(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, CheckStatus::Fail, message)
    }

    pub fn info(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, CheckStatus::Info, message)
    }

    pub fn with_details<I, S>(mut self, details: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.details.extend(details.into_iter().map(Into::into));
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.status == CheckStatus::Fail
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    pub info: usize,
}

/// Aggregated outcome of a full checker run.
///
/// `can_proceed` is true exactly when `failed_checks` is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyReport {
    pub can_proceed: bool,
    pub failed_checks: Vec<CheckResult>,
    /// Warnings and still-pending results
    pub warning_checks: Vec<CheckResult>,
    pub passed_checks: Vec<CheckResult>,
    pub info_checks: Vec<CheckResult>,
    pub summary: CheckSummary,
    pub execution_time: Duration,
    pub resolutions: Vec<ResolutionOutcome>,
}

impl SafetyReport {
    pub fn from_results(results: Vec<CheckResult>, execution_time: Duration) -> Self {
        let total = results.len();
        let mut report = Self {
            can_proceed: false,
            failed_checks: Vec::new(),
            warning_checks: Vec::new(),
            passed_checks: Vec::new(),
            info_checks: Vec::new(),
            summary: CheckSummary::default(),
            execution_time,
            resolutions: Vec::new(),
        };
        for result in results {
            match result.status {
                CheckStatus::Fail => report.failed_checks.push(result),
                CheckStatus::Warn | CheckStatus::Pending => report.warning_checks.push(result),
                CheckStatus::Pass => report.passed_checks.push(result),
                CheckStatus::Info => report.info_checks.push(result),
            }
        }
        report.summary = CheckSummary {
            total,
            passed: report.passed_checks.len(),
            failed: report.failed_checks.len(),
            warnings: report.warning_checks.len(),
            info: report.info_checks.len(),
        };
        report.can_proceed = report.failed_checks.is_empty();
        report
    }

    /// Every result, failures first.
    pub fn results(&self) -> impl Iterator<Item = &CheckResult> {
        self.failed_checks
            .iter()
            .chain(&self.warning_checks)
            .chain(&self.passed_checks)
            .chain(&self.info_checks)
    }

    pub fn find(&self, id: &str) -> Option<&CheckResult> {
        self.results().find(|r| r.id == id)
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.failed_checks.iter().map(|r| r.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn report_groups_by_status() {
        let report = SafetyReport::from_results(
            vec![
                CheckResult::pass("a", "ok"),
                CheckResult::warn("b", "careful"),
                CheckResult::new("c", CheckStatus::Pending, "later"),
                CheckResult::info("d", "fyi"),
            ],
            Duration::from_millis(5),
        );

        assert!(report.can_proceed);
        assert_eq!(
            report.summary,
            CheckSummary {
                total: 4,
                passed: 1,
                failed: 0,
                warnings: 2,
                info: 1,
            }
        );
        assert_eq!(report.find("c").map(|r| r.status), Some(CheckStatus::Pending));
    }

    #[test]
    fn any_fail_blocks() {
        let report = SafetyReport::from_results(
            vec![CheckResult::pass("a", "ok"), CheckResult::fail("b", "bad")],
            Duration::ZERO,
        );
        assert!(!report.can_proceed);
        assert_eq!(report.failed_ids(), vec!["b"]);
        assert_eq!(report.results().next().map(|r| r.id.as_str()), Some("b"));
    }

    #[test]
    fn result_serializes_compactly() {
        let result = CheckResult::warn("destination-filesystem", "Limited filesystem")
            .with_detail("case-insensitive")
            .with_path("/tmp/dest")
            .with_metadata("caseSensitive", false);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "warn");
        assert_eq!(json["details"][0], "case-insensitive");
        assert_eq!(json["metadata"]["caseSensitive"], false);

        let bare = serde_json::to_value(CheckResult::pass("x", "ok")).unwrap();
        assert!(bare.get("details").is_none());
        assert!(bare.get("path").is_none());
    }
}
