//! Upload and generation hooks.
//!
//! Operators can wire external executables into the pipeline: a
//! per-file upload hook that can reject an individual file before it
//! is committed, a pre-generation hook that can veto the publish, and
//! a post-generation hook whose failure is reported but never unwinds
//! a committed publish. Generation hooks receive the branch, source
//! package, and version as arguments; the upload hook receives the
//! branch and file name. Output is captured and attached to the
//! response.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// Captured result of one hook invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HookOutcome {
    /// Whether a hook was configured and executed at all.
    pub ran: bool,
    /// Whether the hook exited successfully (vacuously true when not run).
    pub success: bool,
    /// Exit code, when the process ran to completion.
    pub exit_code: Option<i32>,
    /// Combined captured stdout and stderr.
    pub output: String,
}

impl HookOutcome {
    /// The outcome of an unconfigured hook.
    pub fn skipped() -> Self {
        Self {
            ran: false,
            success: true,
            exit_code: None,
            output: String::new(),
        }
    }
}

/// Something that can run around the publish step.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run(&self, args: &[String]) -> HookOutcome;
}

/// No hook configured.
pub struct NoopHook;

#[async_trait]
impl HookRunner for NoopHook {
    async fn run(&self, _args: &[String]) -> HookOutcome {
        HookOutcome::skipped()
    }
}

/// An external executable, capped by a timeout.
pub struct ScriptHook {
    path: PathBuf,
    timeout: Duration,
}

impl ScriptHook {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }
}

#[async_trait]
impl HookRunner for ScriptHook {
    async fn run(&self, args: &[String]) -> HookOutcome {
        let child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(hook = %self.path.display(), error = %e, "failed to spawn hook");
                return HookOutcome {
                    ran: true,
                    success: false,
                    exit_code: None,
                    output: format!("spawn failed: {e}"),
                };
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => {
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                output.push_str(&String::from_utf8_lossy(&out.stderr));
                HookOutcome {
                    ran: true,
                    success: out.status.success(),
                    exit_code: out.status.code(),
                    output,
                }
            }
            Ok(Err(e)) => HookOutcome {
                ran: true,
                success: false,
                exit_code: None,
                output: format!("wait failed: {e}"),
            },
            Err(_) => {
                warn!(hook = %self.path.display(), "hook timed out");
                HookOutcome {
                    ran: true,
                    success: false,
                    exit_code: None,
                    output: format!("timed out after {:?}", self.timeout),
                }
            }
        }
    }
}

/// A closure-backed hook for wiring test behavior in-process.
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> HookRunner for FnHook<F>
where
    F: Fn(&[String]) -> HookOutcome + Send + Sync,
{
    async fn run(&self, args: &[String]) -> HookOutcome {
        (self.0)(args)
    }
}
