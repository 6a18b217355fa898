//! User sync rules and the built-in default excludes
//!
//! Rules live in `.lerian-sync-rules.json` at the destination root as a JSON
//! array and are folded over the change list in declared order. The default
//! exclude set always runs last, so no rule can resurrect `.git` or the
//! engine's own state directory.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lerian_fs::{NormalizedPath, SyncPath, TraverseEntry};

use super::change::FileChange;
use super::strategy::ComparisonStrategy;
use crate::{Error, Result};

/// Paths never synced in either direction.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git",
    "**/.git/**",
    "**/node_modules",
    "**/node_modules/**",
    ".lerian-sync-cache",
    ".lerian-sync-cache/**",
    ".lerian-sync-rules.json",
    "**/.DS_Store",
    "**/Thumbs.db",
    "**/*.swp",
    "**/*~",
    "**/.*.tmp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Glob,
    Regex,
    Path,
    Extension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Keep only matching changes
    Include,
    /// Drop matching changes
    Exclude,
    /// Move matching changes to the front, keeping relative order
    Priority,
    /// Attach the rule's `transform` value to matching changes
    Transform,
}

/// Guard that must hold for a rule to apply.
///
/// Every present field must match; an empty condition always holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ComparisonStrategy>,
    /// Operating system name as in `std::env::consts::OS`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Variable name to expected value; `*` only requires the variable to be set
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

impl RuleCondition {
    pub fn holds(&self, ctx: &RuleContext) -> bool {
        self.strategy.is_none_or(|s| s == ctx.strategy)
            && self
                .platform
                .as_deref()
                .is_none_or(|p| p.eq_ignore_ascii_case(&ctx.platform))
            && self.dry_run.is_none_or(|d| d == ctx.dry_run)
            && self.env.iter().all(|(key, expected)| {
                ctx.env
                    .get(key)
                    .is_some_and(|actual| expected == "*" || actual == expected)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub pattern: String,
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<RuleCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Value>,
}

/// Facts rule conditions are evaluated against.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleContext {
    pub strategy: ComparisonStrategy,
    pub platform: String,
    pub env: BTreeMap<String, String>,
    pub dry_run: bool,
}

impl RuleContext {
    /// Context for the running process.
    pub fn current(strategy: ComparisonStrategy, dry_run: bool) -> Self {
        Self {
            strategy,
            platform: std::env::consts::OS.to_string(),
            env: std::env::vars().collect(),
            dry_run,
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Glob(GlobMatcher),
    Regex(Regex),
    Path(String),
    Extension(Vec<String>),
}

impl Matcher {
    fn compile(rule: &SyncRule) -> std::result::Result<Self, String> {
        match rule.rule_type {
            RuleType::Glob => glob(&rule.pattern)
                .map(|g| Self::Glob(g.compile_matcher()))
                .map_err(|e| e.to_string()),
            RuleType::Regex => Regex::new(&rule.pattern)
                .map(Self::Regex)
                .map_err(|e| e.to_string()),
            RuleType::Path => {
                let path = NormalizedPath::new(&rule.pattern);
                if path.is_empty() {
                    Err("path pattern is empty".to_string())
                } else {
                    Ok(Self::Path(path.as_str().to_string()))
                }
            }
            RuleType::Extension => {
                let extensions: Vec<String> = rule
                    .pattern
                    .split(',')
                    .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect();
                if extensions.is_empty() {
                    Err("extension pattern is empty".to_string())
                } else {
                    Ok(Self::Extension(extensions))
                }
            }
        }
    }

    fn is_match(&self, relative: &str) -> bool {
        match self {
            Self::Glob(g) => g.is_match(relative),
            Self::Regex(r) => r.is_match(relative),
            Self::Path(p) => NormalizedPath::new(relative).is_within(p),
            Self::Extension(exts) => NormalizedPath::new(relative)
                .extension()
                .is_some_and(|ext| exts.contains(&ext)),
        }
    }
}

fn glob(pattern: &str) -> std::result::Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: SyncRule,
    matcher: Matcher,
}

impl CompiledRule {
    fn applies(&self, ctx: &RuleContext) -> bool {
        self.rule.condition.as_ref().is_none_or(|c| c.holds(ctx))
    }

    fn matches(&self, change: &FileChange) -> bool {
        self.matcher.is_match(&change.relative_path)
    }
}

/// The default exclude set as a compiled glob set.
pub fn default_excludes() -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in DEFAULT_EXCLUDES {
        // Patterns are constants known to compile
        if let Ok(g) = glob(pattern) {
            builder.add(g);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// Traversal filter that prunes default-excluded entries.
pub fn default_exclude_filter() -> impl Fn(&TraverseEntry) -> bool + Send + Sync + 'static {
    let excludes = Arc::new(default_excludes());
    move |entry: &TraverseEntry| !excludes.is_match(entry.path.as_str())
}

/// Compiled user rules plus the default excludes.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    defaults: GlobSet,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            defaults: default_excludes(),
        }
    }
}

impl RuleSet {
    /// Compile `rules`, rejecting the first bad pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRule`] with the rule's position.
    pub fn compile(rules: Vec<SyncRule>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (index, rule) in rules.into_iter().enumerate() {
            let matcher = Matcher::compile(&rule).map_err(|message| Error::InvalidRule { index, message })?;
            compiled.push(CompiledRule { rule, matcher });
        }
        Ok(Self {
            rules: compiled,
            defaults: default_excludes(),
        })
    }

    /// Load the rules file from a destination root.
    ///
    /// A missing file means no custom rules.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RulesFile`] when the file is unreadable, is not a
    /// JSON array of rules, or holds a rule that does not compile.
    pub fn load(destination: &Path) -> Result<Self> {
        let path = destination.join(SyncPath::RulesFile);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No sync rules file");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::RulesFile {
                    path,
                    message: e.to_string(),
                });
            }
        };

        let rules: Vec<SyncRule> = serde_json::from_str(&content).map_err(|e| Error::RulesFile {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let count = rules.len();
        let set = Self::compile(rules).map_err(|e| Error::RulesFile {
            path: path.clone(),
            message: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), count, "Loaded sync rules");
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_default_excluded(&self, relative: &str) -> bool {
        self.defaults.is_match(relative)
    }

    /// Fold every applicable rule over `files`, then drop default excludes.
    pub fn apply(&self, mut files: Vec<FileChange>, ctx: &RuleContext) -> Vec<FileChange> {
        for compiled in self.rules.iter().filter(|r| r.applies(ctx)) {
            match compiled.rule.action {
                RuleAction::Include => files.retain(|f| compiled.matches(f)),
                RuleAction::Exclude => files.retain(|f| !compiled.matches(f)),
                RuleAction::Priority => {
                    let (mut front, back): (Vec<_>, Vec<_>) =
                        files.into_iter().partition(|f| compiled.matches(f));
                    front.extend(back);
                    files = front;
                }
                RuleAction::Transform => {
                    let Some(transform) = &compiled.rule.transform else {
                        continue;
                    };
                    for file in files.iter_mut().filter(|f| compiled.matches(f)) {
                        attach_transform(file, transform.clone());
                    }
                }
            }
        }
        files.retain(|f| !self.is_default_excluded(&f.relative_path));
        files
    }
}

fn attach_transform(file: &mut FileChange, transform: Value) {
    match file.metadata.get_mut("transforms") {
        Some(Value::Array(list)) => list.push(transform),
        _ => {
            file.metadata
                .insert("transforms".to_string(), Value::Array(vec![transform]));
        }
    }
}
