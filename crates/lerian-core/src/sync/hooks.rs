//! Lifecycle hooks around a sync run
//!
//! Handlers are registered per [`HookType`] with a priority and run highest
//! priority first. Each handler runs in its own task raced against a
//! timeout; a failure, panic or timeout is counted and never stops the
//! remaining handlers or the sync itself. `[[hooks]]` config entries become
//! [`CommandHook`] handlers that run a subprocess.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Points in a sync run where hooks fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookType {
    BeforeSync,
    AfterSync,
    /// Before each file operation
    BeforeOperation,
    /// After each successful file operation
    AfterOperation,
    OnError,
    OnComplete,
    OnCancel,
}

impl HookType {
    pub const ALL: [HookType; 7] = [
        Self::BeforeSync,
        Self::AfterSync,
        Self::BeforeOperation,
        Self::AfterOperation,
        Self::OnError,
        Self::OnComplete,
        Self::OnCancel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::BeforeSync => "beforeSync",
            Self::AfterSync => "afterSync",
            Self::BeforeOperation => "beforeOperation",
            Self::AfterOperation => "afterOperation",
            Self::OnError => "onError",
            Self::OnComplete => "onComplete",
            Self::OnCancel => "onCancel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == s)
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a handler is told about the current run
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub session_id: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Relative path of the file being operated on
    pub path: Option<String>,
    pub error: Option<String>,
}

impl HookContext {
    pub fn new(session_id: impl Into<String>, source: &Path, destination: &Path) -> Self {
        Self {
            session_id: session_id.into(),
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            path: None,
            error: None,
        }
    }

    pub fn for_path(&self, path: &str) -> Self {
        Self {
            path: Some(path.to_string()),
            ..self.clone()
        }
    }

    pub fn with_error(&self, error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..self.clone()
        }
    }

    /// Variables exported to command hooks.
    pub fn vars(&self, hook_type: HookType) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("HOOK_TYPE".to_string(), hook_type.to_string());
        vars.insert("SYNC_SESSION".to_string(), self.session_id.clone());
        vars.insert("SYNC_SOURCE".to_string(), self.source.display().to_string());
        vars.insert(
            "SYNC_DESTINATION".to_string(),
            self.destination.display().to_string(),
        );
        vars.insert("SYNC_PATH".to_string(), self.path.clone().unwrap_or_default());
        if let Some(error) = &self.error {
            vars.insert("SYNC_ERROR".to_string(), error.clone());
        }
        vars
    }
}

#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn call(&self, hook_type: HookType, ctx: &HookContext) -> Result<()>;
}

/// Adapts a synchronous closure into a [`HookHandler`].
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> HookHandler for FnHook<F>
where
    F: Fn(HookType, &HookContext) -> Result<()> + Send + Sync,
{
    async fn call(&self, hook_type: HookType, ctx: &HookContext) -> Result<()> {
        (self.0)(hook_type, ctx)
    }
}

#[derive(Clone)]
pub struct HookRegistration {
    pub hook_type: HookType,
    pub id: String,
    pub handler: Arc<dyn HookHandler>,
    pub priority: i32,
}

impl fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistration")
            .field("hook_type", &self.hook_type)
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Extension bundle that registers its own hooks.
pub trait SyncPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn register(&self, registry: &mut HookRegistry);
}

#[derive(Debug, Default, Clone)]
pub struct HookRegistry {
    hooks: HashMap<HookType, Vec<HookRegistration>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        hook_type: HookType,
        id: impl Into<String>,
        priority: i32,
        handler: Arc<dyn HookHandler>,
    ) {
        let list = self.hooks.entry(hook_type).or_default();
        list.push(HookRegistration {
            hook_type,
            id: id.into(),
            handler,
            priority,
        });
        // Stable: equal priorities keep registration order
        list.sort_by_key(|r| std::cmp::Reverse(r.priority));
    }

    /// Remove every registration with `id`. Returns how many were removed.
    pub fn unregister(&mut self, id: &str) -> usize {
        let mut removed = 0;
        for list in self.hooks.values_mut() {
            let before = list.len();
            list.retain(|r| r.id != id);
            removed += before - list.len();
        }
        removed
    }

    pub fn install(&mut self, plugin: &dyn SyncPlugin) {
        tracing::debug!(plugin = plugin.name(), "Installing sync plugin");
        plugin.register(self);
    }

    /// Handlers for `hook_type`, highest priority first.
    pub fn handlers(&self, hook_type: HookType) -> &[HookRegistration] {
        self.hooks.get(&hook_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    pub id: String,
    pub message: String,
}

/// Outcome counts of one [`execute_hooks`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookStats {
    pub executed: usize,
    pub successful: usize,
    pub failed: usize,
    pub failures: Vec<HookFailure>,
}

impl HookStats {
    pub fn merge(&mut self, other: HookStats) {
        self.executed += other.executed;
        self.successful += other.successful;
        self.failed += other.failed;
        self.failures.extend(other.failures);
    }
}

/// Run every handler registered for `hook_type`.
pub async fn execute_hooks(
    registry: &HookRegistry,
    hook_type: HookType,
    ctx: &HookContext,
    timeout: Duration,
) -> HookStats {
    let mut stats = HookStats::default();
    for registration in registry.handlers(hook_type) {
        stats.executed += 1;
        let handler = Arc::clone(&registration.handler);
        let task_ctx = ctx.clone();
        let mut task = tokio::spawn(async move { handler.call(hook_type, &task_ctx).await });

        let failure = match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(e.to_string()),
            Ok(Err(join)) if join.is_panic() => Some("handler panicked".to_string()),
            Ok(Err(join)) => Some(join.to_string()),
            Err(_) => {
                task.abort();
                Some(format!("timed out after {timeout:?}"))
            }
        };

        match failure {
            None => stats.successful += 1,
            Some(message) => {
                tracing::warn!(hook = %hook_type, id = %registration.id, error = %message, "Hook failed");
                stats.failed += 1;
                stats.failures.push(HookFailure {
                    id: registration.id.clone(),
                    message,
                });
            }
        }
    }
    stats
}

/// Configuration for a subprocess hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookConfig {
    /// The hook point that triggers this command
    pub event: HookType,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory, relative to the destination root unless absolute
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub priority: i32,
}

/// Runs a configured command when its hook fires.
#[derive(Debug, Clone)]
pub struct CommandHook {
    config: HookConfig,
}

impl CommandHook {
    pub fn new(config: HookConfig) -> Self {
        Self { config }
    }

    fn id(&self) -> String {
        format!("command:{}", self.config.command)
    }

    fn failure(&self, message: impl Into<String>) -> Error {
        Error::Hook {
            id: self.id(),
            message: message.into(),
        }
    }

    async fn work_dir(&self, root: &Path) -> Result<PathBuf> {
        let Some(custom) = &self.config.working_dir else {
            return Ok(root.to_path_buf());
        };
        let dir = if custom.is_absolute() {
            custom.clone()
        } else {
            root.join(custom)
        };

        // Keep hooks inside the destination tree
        if let (Ok(canon_dir), Ok(canon_root)) =
            (tokio::fs::canonicalize(&dir).await, tokio::fs::canonicalize(root).await)
            && !canon_dir.starts_with(&canon_root)
        {
            return Err(self.failure(format!(
                "working_dir {} is outside the destination {}",
                dir.display(),
                root.display()
            )));
        }
        Ok(dir)
    }
}

#[async_trait]
impl HookHandler for CommandHook {
    async fn call(&self, hook_type: HookType, ctx: &HookContext) -> Result<()> {
        let work_dir = self.work_dir(&ctx.destination).await?;
        let vars = ctx.vars(hook_type);
        let args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|arg| substitute_vars(arg, &vars))
            .collect();

        let output = tokio::process::Command::new(&self.config.command)
            .args(&args)
            .current_dir(&work_dir)
            .envs(&vars)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.failure(format!("failed to spawn: {e}")))?;

        if output.status.success() {
            tracing::debug!(hook = %hook_type, command = %self.config.command, "Command hook succeeded");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let message = if stderr.is_empty() {
            format!("exited with {:?}", output.status.code())
        } else {
            format!("exited with {:?}: {stderr}", output.status.code())
        };
        Err(self.failure(message))
    }
}

/// Register one [`CommandHook`] per config entry.
pub fn register_command_hooks(registry: &mut HookRegistry, configs: &[HookConfig]) {
    for (index, config) in configs.iter().enumerate() {
        let id = format!("command:{index}:{}", config.command);
        registry.register(
            config.event,
            id,
            config.priority,
            Arc::new(CommandHook::new(config.clone())),
        );
    }
}

/// Substitute `${VAR_NAME}` patterns with context variables
fn substitute_vars(input: &str, vars: &HashMap<String, String>) -> String {
    let mut result = input.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("${{{key}}}"), value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> Arc<dyn HookHandler> {
        let log = Arc::clone(log);
        Arc::new(FnHook(move |_: HookType, _: &HookContext| {
            log.lock().unwrap().push(label.to_string());
            Ok(())
        }))
    }

    struct Sleeper;

    #[async_trait]
    impl HookHandler for Sleeper {
        async fn call(&self, _: HookType, _: &HookContext) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    struct Panicker;

    #[async_trait]
    impl HookHandler for Panicker {
        async fn call(&self, _: HookType, _: &HookContext) -> Result<()> {
            panic!("hook blew up");
        }
    }

    #[test]
    fn hook_type_names_roundtrip() {
        for hook_type in HookType::ALL {
            assert_eq!(HookType::parse(hook_type.name()), Some(hook_type));
            let json = serde_json::to_string(&hook_type).unwrap();
            assert_eq!(json, format!("\"{}\"", hook_type.name()));
        }
    }

    #[tokio::test]
    async fn handlers_run_by_descending_priority_stable() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry.register(HookType::BeforeSync, "low", 1, recorder(&log, "low"));
        registry.register(HookType::BeforeSync, "high", 10, recorder(&log, "high"));
        registry.register(HookType::BeforeSync, "low-2", 1, recorder(&log, "low-2"));

        let stats = execute_hooks(
            &registry,
            HookType::BeforeSync,
            &HookContext::default(),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(stats.executed, 3);
        assert_eq!(stats.successful, 3);
        assert_eq!(*log.lock().unwrap(), vec!["high", "low", "low-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_later_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry.register(HookType::OnError, "slow", 30, Arc::new(Sleeper));
        registry.register(HookType::OnError, "panics", 20, Arc::new(Panicker));
        registry.register(
            HookType::OnError,
            "errors",
            10,
            Arc::new(FnHook(|_: HookType, _: &HookContext| {
                Err(Error::Hook {
                    id: "errors".into(),
                    message: "nope".into(),
                })
            })),
        );
        registry.register(HookType::OnError, "last", 0, recorder(&log, "last"));

        let stats = execute_hooks(
            &registry,
            HookType::OnError,
            &HookContext::default(),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(stats.executed, 4);
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.successful, 1);
        let failed: Vec<&str> = stats.failures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(failed, vec!["slow", "panics", "errors"]);
        assert!(stats.failures[0].message.contains("timed out"));
        assert_eq!(*log.lock().unwrap(), vec!["last"]);
    }

    #[test]
    fn unregister_and_plugins() {
        struct Plugin;
        impl SyncPlugin for Plugin {
            fn name(&self) -> &str {
                "audit-extra"
            }
            fn register(&self, registry: &mut HookRegistry) {
                for hook_type in [HookType::BeforeSync, HookType::AfterSync] {
                    registry.register(
                        hook_type,
                        "audit-extra",
                        0,
                        Arc::new(FnHook(|_: HookType, _: &HookContext| Ok(()))),
                    );
                }
            }
        }

        let mut registry = HookRegistry::new();
        registry.install(&Plugin);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.unregister("audit-extra"), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn substitute_known_vars() {
        let ctx = HookContext::new("s-1", Path::new("/src"), Path::new("/dst")).for_path("a.md");
        let vars = ctx.vars(HookType::AfterOperation);
        assert_eq!(
            substitute_vars("${HOOK_TYPE} ${SYNC_PATH} in ${SYNC_DESTINATION}", &vars),
            "afterOperation a.md in /dst"
        );
        assert_eq!(substitute_vars("${UNKNOWN}", &vars), "${UNKNOWN}");
    }

    #[test]
    fn hook_config_from_toml() {
        let hook: HookConfig = toml::from_str(
            r#"
event = "afterSync"
command = "npm"
args = ["run", "format"]
priority = 5
"#,
        )
        .unwrap();
        assert_eq!(hook.event, HookType::AfterSync);
        assert_eq!(hook.args, vec!["run", "format"]);
        assert_eq!(hook.working_dir, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_hook_sees_context_vars() {
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join("marker.txt");
        let hook = CommandHook::new(HookConfig {
            event: HookType::AfterOperation,
            command: "sh".into(),
            args: vec![
                "-c".into(),
                format!("echo \"$HOOK_TYPE ${{SYNC_PATH}}\" > '{}'", marker.display()),
            ],
            working_dir: None,
            priority: 0,
        });
        let ctx = HookContext::new("s-1", temp.path(), temp.path()).for_path("agents/a.md");

        hook.call(HookType::AfterOperation, &ctx).await.unwrap();

        let content = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(content.trim(), "afterOperation agents/a.md");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_hook_failure_carries_stderr() {
        let temp = tempfile::tempdir().unwrap();
        let hook = CommandHook::new(HookConfig {
            event: HookType::BeforeSync,
            command: "sh".into(),
            args: vec!["-c".into(), "echo 'failing on purpose' >&2; exit 1".into()],
            working_dir: None,
            priority: 0,
        });
        let ctx = HookContext::new("s-1", temp.path(), temp.path());

        let err = hook.call(HookType::BeforeSync, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("failing on purpose"));
    }

    #[tokio::test]
    async fn command_hook_rejects_working_dir_outside_destination() {
        let dest = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let hook = CommandHook::new(HookConfig {
            event: HookType::BeforeSync,
            command: "true".into(),
            args: vec![],
            working_dir: Some(elsewhere.path().to_path_buf()),
            priority: 0,
        });
        let ctx = HookContext::new("s-1", dest.path(), dest.path());

        let err = hook.call(HookType::BeforeSync, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("outside the destination"));
    }
}
