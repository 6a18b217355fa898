//! Orchestration of the registered safety checkers
//!
//! Checkers are grouped into dependency waves; each wave runs concurrently
//! and every checker invocation is bounded by a timeout inside a retry loop.
//! A checker that exhausts its attempts contributes one synthetic `fail`
//! result and never affects the others.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::checker::SafetyChecker;
use super::resolver::{ResolutionOutcome, SafetyResolver};
use super::result::{CheckResult, SafetyReport};
use crate::cache::TtlCache;
use crate::Error;

/// Id of the synthetic result reported when the checkers cannot be scheduled.
pub const RUNNER_ERROR_ID: &str = "runner-error";

/// Upper bound on any single pause between checker attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Run independent checkers concurrently
    pub parallel: bool,
    /// Per-attempt timeout for one checker
    pub timeout_ms: u64,
    /// Total attempts per checker, including the first
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    /// Longest pause between attempts, capped at [`MAX_RETRY_DELAY`]
    pub backoff_max_ms: u64,
    pub cache_ttl_secs: u64,
    /// Hand failing and warning results to a resolver when one is supplied
    pub allow_resolution: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            timeout_ms: 30_000,
            max_retries: 3,
            backoff_initial_ms: 200,
            backoff_max_ms: 10_000,
            cache_ttl_secs: 120,
            allow_resolution: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Resolving,
    Done { passed: bool },
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    timeout: Duration,
    initial: Duration,
    max: Duration,
}

impl RetryPolicy {
    fn from_config(config: &RunnerConfig) -> Self {
        Self {
            attempts: config.max_retries.max(1),
            timeout: Duration::from_millis(config.timeout_ms),
            initial: Duration::from_millis(config.backoff_initial_ms).min(MAX_RETRY_DELAY),
            max: Duration::from_millis(config.backoff_max_ms).min(MAX_RETRY_DELAY),
        }
    }
}

pub struct SafetyCheckRunner {
    config: RunnerConfig,
    checkers: Vec<Arc<dyn SafetyChecker>>,
    state: Mutex<RunnerState>,
    cache: TtlCache<SafetyReport>,
}

impl SafetyCheckRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let cache = TtlCache::new(Duration::from_secs(config.cache_ttl_secs));
        Self {
            config,
            checkers: Vec::new(),
            state: Mutex::new(RunnerState::Idle),
            cache,
        }
    }

    pub fn register(&mut self, checker: Arc<dyn SafetyChecker>) {
        self.checkers.push(checker);
    }

    pub fn with_checker(mut self, checker: impl SafetyChecker + 'static) -> Self {
        self.register(Arc::new(checker));
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn checker_ids(&self) -> Vec<&str> {
        self.checkers.iter().map(|c| c.id()).collect()
    }

    pub fn state(&self) -> RunnerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: RunnerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Run the suite, or return the cached report while it is fresh.
    ///
    /// With a `resolver`, a blocked report's failing and warning results are
    /// offered for resolution; if any remedy changed the environment the
    /// suite runs again with the cache bypassed.
    pub async fn run(&self, resolver: Option<&SafetyResolver>) -> SafetyReport {
        if let Some(cached) = self.cache.get() {
            tracing::debug!("Using cached safety report");
            return cached;
        }

        let started = Instant::now();
        let mut report = self.run_checks().await;

        if !report.can_proceed
            && self.config.allow_resolution
            && let Some(resolver) = resolver
        {
            self.set_state(RunnerState::Resolving);
            let issues: Vec<CheckResult> = report
                .failed_checks
                .iter()
                .chain(&report.warning_checks)
                .cloned()
                .collect();
            let outcomes = resolver.resolve_all(&issues).await;
            if outcomes.iter().any(ResolutionOutcome::requires_rerun) {
                tracing::info!("Re-running safety checks after resolution");
                self.invalidate();
                report = self.run_checks().await;
            }
            report.resolutions = outcomes;
        }

        report.execution_time = started.elapsed();
        self.set_state(RunnerState::Done {
            passed: report.can_proceed,
        });
        tracing::info!(
            can_proceed = report.can_proceed,
            failed = report.summary.failed,
            warnings = report.summary.warnings,
            elapsed_ms = report.execution_time.as_millis() as u64,
            "Safety checks complete"
        );
        self.cache.set(report.clone());
        report
    }

    /// Run every checker once, ignoring the cache and skipping resolution.
    pub async fn run_checks(&self) -> SafetyReport {
        self.set_state(RunnerState::Running);
        let started = Instant::now();

        let waves = match self.plan_waves() {
            Ok(waves) => waves,
            Err(message) => {
                tracing::error!(error = %message, "Cannot schedule safety checkers");
                let report = SafetyReport::from_results(
                    vec![CheckResult::fail(RUNNER_ERROR_ID, message)],
                    started.elapsed(),
                );
                self.set_state(RunnerState::Done { passed: false });
                return report;
            }
        };

        let policy = RetryPolicy::from_config(&self.config);
        let mut results = Vec::new();
        for wave in waves {
            let checkers = wave.into_iter().map(|i| Arc::clone(&self.checkers[i]));
            if self.config.parallel {
                let handles: Vec<_> = checkers.map(|c| spawn_checker(c, policy)).collect();
                for (id, handle) in handles {
                    results.extend(join_checker(&id, handle).await);
                }
            } else {
                for checker in checkers {
                    let (id, handle) = spawn_checker(checker, policy);
                    results.extend(join_checker(&id, handle).await);
                }
            }
        }

        let report = SafetyReport::from_results(results, started.elapsed());
        self.set_state(RunnerState::Done {
            passed: report.can_proceed,
        });
        report
    }

    /// Drop the cached report.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Drop the cached report and return to [`RunnerState::Idle`].
    pub fn clear(&self) {
        self.cache.clear();
        self.set_state(RunnerState::Idle);
    }

    /// Group checkers into waves whose dependencies all ran earlier.
    fn plan_waves(&self) -> std::result::Result<Vec<Vec<usize>>, String> {
        let mut index_of = HashMap::new();
        for (i, checker) in self.checkers.iter().enumerate() {
            if index_of.insert(checker.id(), i).is_some() {
                return Err(format!("Checker id `{}` is registered twice", checker.id()));
            }
        }

        let mut pending: BTreeMap<usize, usize> = BTreeMap::new();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.checkers.len()];
        for (i, checker) in self.checkers.iter().enumerate() {
            let dependencies = checker.dependencies();
            for dependency in &dependencies {
                let Some(&d) = index_of.get(dependency.as_str()) else {
                    return Err(format!(
                        "Checker `{}` depends on unknown checker `{dependency}`",
                        checker.id()
                    ));
                };
                dependents[d].push(i);
            }
            pending.insert(i, dependencies.len());
        }

        let mut waves = Vec::new();
        while !pending.is_empty() {
            let ready: Vec<usize> = pending
                .iter()
                .filter(|(_, remaining)| **remaining == 0)
                .map(|(i, _)| *i)
                .collect();
            if ready.is_empty() {
                let stuck: Vec<&str> = pending.keys().map(|&i| self.checkers[i].id()).collect();
                return Err(format!("Dependency cycle among checkers: {}", stuck.join(", ")));
            }
            for &i in &ready {
                pending.remove(&i);
                for &dependent in &dependents[i] {
                    if let Some(remaining) = pending.get_mut(&dependent) {
                        *remaining -= 1;
                    }
                }
            }
            waves.push(ready);
        }
        Ok(waves)
    }
}

impl std::fmt::Debug for SafetyCheckRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyCheckRunner")
            .field("config", &self.config)
            .field("checkers", &self.checker_ids())
            .field("state", &self.state())
            .finish()
    }
}

/// Run one checker on its own task so a panic stays local to it.
fn spawn_checker(
    checker: Arc<dyn SafetyChecker>,
    policy: RetryPolicy,
) -> (String, JoinHandle<Vec<CheckResult>>) {
    let id = checker.id().to_string();
    (id, tokio::spawn(async move { run_checker(checker.as_ref(), policy).await }))
}

async fn join_checker(id: &str, handle: JoinHandle<Vec<CheckResult>>) -> Vec<CheckResult> {
    match handle.await {
        Ok(results) => results,
        Err(e) => {
            tracing::error!(checker = %id, error = %e, "Safety checker task failed");
            vec![CheckResult::fail(id, format!("Checker {id} crashed: {e}"))]
        }
    }
}

/// One checker under the retry policy.
async fn run_checker(checker: &dyn SafetyChecker, policy: RetryPolicy) -> Vec<CheckResult> {
    let id = checker.id();
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial)
        .with_max_interval(policy.max)
        .with_max_elapsed_time(None)
        .build();

    let mut last_error = String::new();
    for attempt in 1..=policy.attempts {
        let error = match tokio::time::timeout(policy.timeout, checker.perform_checks()).await {
            Ok(Ok(results)) => {
                if attempt > 1 {
                    tracing::info!(checker = %id, attempt, "Safety checker recovered");
                }
                return results;
            }
            Ok(Err(e)) => e,
            Err(_) => Error::Timeout {
                operation: format!("Checker {id}"),
                after: policy.timeout,
            },
        };
        tracing::warn!(
            checker = %id,
            attempt,
            attempts = policy.attempts,
            error = %error,
            "Safety checker attempt failed"
        );
        last_error = error.to_string();

        if attempt < policy.attempts {
            // Jitter can push a capped interval past the cap
            let delay = backoff.next_backoff().unwrap_or(policy.max).min(policy.max);
            tokio::time::sleep(delay).await;
        }
    }

    vec![
        CheckResult::fail(
            id,
            format!("{id} failed after {} attempt(s): {last_error}", policy.attempts),
        )
        .with_metadata("attempts", policy.attempts),
    ]
}
