//! Subprocess execution
//!
//! Every external tool (package manager, interpreter, system package
//! manager) runs through a [`ProcessRunner`] so the state machine can be
//! driven by a scripted runner in tests.

use super::stream_child_output;
use crate::error::{AccelError, AccelResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// A fully described subprocess invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shell-like rendering for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Result of a finished (or killed) subprocess
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when killed by a signal or by the timeout
    pub code: Option<i32>,
    /// Interleaved stdout and stderr lines
    pub lines: Vec<String>,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    /// Full transcript as one string
    pub fn transcript(&self) -> String {
        self.lines.join("\n")
    }
}

/// Runs subprocesses to completion
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `spec`, capturing its output
    ///
    /// A non-zero exit or a timeout is reported through [`ProcessOutput`];
    /// only spawn failures and user interrupts are errors.
    async fn run(&self, spec: &CommandSpec) -> AccelResult<ProcessOutput>;

    /// Run `spec` in the foreground with the terminal attached
    ///
    /// For commands that may need to talk to the operator (a `sudo` password
    /// prompt). Output goes straight to the terminal, so `lines` is empty.
    async fn run_attached(&self, spec: &CommandSpec) -> AccelResult<ProcessOutput>;
}

/// Runs real processes, each in its own process group
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

enum Outcome {
    Exited(Option<i32>),
    TimedOut,
    Interrupted,
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> AccelResult<ProcessOutput> {
        debug!("Executing: {}", spec.display());

        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| AccelError::command_failed(spec.display(), e))?;
        // Armed until the child exits; dropping this future kills the group
        let mut group = GroupGuard(child.id());

        let mut lines = Vec::new();
        let on_output = |line: String| debug!(target: "accel::subprocess", "{}", line);
        let deadline = async {
            match spec.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = async {
                stream_child_output(&mut child, &mut lines, &on_output).await;
                child.wait().await
            } => {
                let status = status.map_err(|e| AccelError::command_failed(spec.display(), e))?;
                Outcome::Exited(status.code())
            }
            _ = deadline => Outcome::TimedOut,
            Ok(()) = tokio::signal::ctrl_c() => Outcome::Interrupted,
        };

        match outcome {
            Outcome::Exited(code) => {
                group.disarm();
                Ok(ProcessOutput {
                    code,
                    lines,
                    timed_out: false,
                })
            }
            Outcome::TimedOut => {
                warn!("Timed out, killing: {}", spec.display());
                group.kill();
                let _ = child.kill().await;
                Ok(ProcessOutput {
                    code: None,
                    lines,
                    timed_out: true,
                })
            }
            Outcome::Interrupted => {
                group.kill();
                let _ = child.kill().await;
                Err(AccelError::Interrupted)
            }
        }
    }

    async fn run_attached(&self, spec: &CommandSpec) -> AccelResult<ProcessOutput> {
        debug!("Executing attached: {}", spec.display());

        // Same process group as accel, so the terminal stays readable
        let mut child = spec
            .to_command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AccelError::command_failed(spec.display(), e))?;

        let deadline = async {
            match spec.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = deadline => None,
        };

        match status {
            Some(status) => {
                let status = status.map_err(|e| AccelError::command_failed(spec.display(), e))?;
                Ok(ProcessOutput {
                    code: status.code(),
                    lines: Vec::new(),
                    timed_out: false,
                })
            }
            None => {
                warn!("Timed out, killing: {}", spec.display());
                let _ = child.kill().await;
                Ok(ProcessOutput {
                    code: None,
                    lines: Vec::new(),
                    timed_out: true,
                })
            }
        }
    }
}

/// Kills a child's process group when dropped, unless disarmed
struct GroupGuard(Option<u32>);

impl GroupGuard {
    fn disarm(&mut self) {
        self.0 = None;
    }

    fn kill(&mut self) {
        if let Some(pid) = self.0.take() {
            kill_group(pid);
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kill the process group led by `pid`
fn kill_group(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; a stale pgid yields ESRCH
    #[cfg(unix)]
    let _ = unsafe { libc::killpg(pid, libc::SIGKILL) };
    #[cfg(not(unix))]
    let _ = pid;
}

/// Run `spec` with inherited stdio and return its exit code
///
/// Used when accel has nothing to accelerate and just forwards arguments.
pub async fn run_passthrough(spec: &CommandSpec) -> AccelResult<i32> {
    debug!("Forwarding: {}", spec.display());
    let output = SystemRunner.run_attached(spec).await?;
    Ok(output.code.unwrap_or(1))
}
