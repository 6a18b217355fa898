//! Policy-checked `git` subprocesses
//!
//! Only read-only inspection commands and the handful of remediation
//! commands the resolver offers may run. Everything else is rejected before
//! a process is spawned.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::{Error, Result};

/// What an allowed command may do to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    ReadOnly,
    Remediation,
}

/// Classify `args` (without the leading `git`), or `None` if disallowed.
pub fn classify(args: &[&str]) -> Option<CommandClass> {
    use CommandClass::*;
    match args {
        ["--version"] | ["version"] => Some(ReadOnly),
        ["status" | "log" | "diff" | "show" | "rev-parse" | "rev-list" | "ls-files"
        | "describe", ..] => Some(ReadOnly),
        ["stash", "list" | "show", ..] => Some(ReadOnly),
        ["branch"] | ["branch", "--list" | "--show-current", ..] => Some(ReadOnly),
        ["config", "--get" | "--list", ..] => Some(ReadOnly),
        ["remote"] | ["remote", "-v"] => Some(ReadOnly),

        ["add", "-A" | "--all"] => Some(Remediation),
        ["commit", "-m", _] => Some(Remediation),
        ["stash", "push", rest @ ..] if stash_push_args_ok(rest) => Some(Remediation),
        ["merge" | "rebase" | "cherry-pick" | "revert", "--abort"] => Some(Remediation),
        ["bisect", "reset"] => Some(Remediation),
        _ => None,
    }
}

fn stash_push_args_ok(rest: &[&str]) -> bool {
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "-u" | "--include-untracked" => {}
            "-m" | "--message" => {
                if iter.next().is_none() {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

/// Runs git in one working directory with a per-command timeout.
#[derive(Debug, Clone)]
pub struct GitRunner {
    workdir: PathBuf,
    program: OsString,
    timeout: Duration,
}

impl GitRunner {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            program: OsString::from("git"),
            timeout,
        }
    }

    /// Use a different executable, e.g. a pinned path.
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run `git <args>` and return its stdout.
    ///
    /// The child is killed if the timeout elapses or the future is dropped.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let command = args.join(" ");
        let Some(class) = classify(args) else {
            tracing::warn!(command = %command, "Blocked git command outside the allowlist");
            return Err(Error::DisallowedCommand { command });
        };
        tracing::debug!(command = %command, class = ?class, workdir = %self.workdir.display(), "Running git");

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if class == CommandClass::ReadOnly {
            cmd.env("GIT_OPTIONAL_LOCKS", "0");
        }

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(Error::Timeout {
                    command,
                    after: self.timeout,
                });
            }
            Ok(Err(source)) => {
                return Err(Error::Spawn {
                    program: self.program.to_string_lossy().into_owned(),
                    source,
                });
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Whether the configured executable starts and reports a version.
    pub async fn is_available(&self) -> bool {
        self.run(&["--version"]).await.is_ok()
    }
}
