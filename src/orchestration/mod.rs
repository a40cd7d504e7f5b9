//! Build orchestration
//!
//! Drives the acquire → extract → build → install state machine and owns
//! the subprocess plumbing it runs on.

mod orchestrator;
pub mod runner;
mod state;

pub use orchestrator::{is_upgrade, Collaborators, InstallReport, Orchestrator};
pub use runner::{run_passthrough, CommandSpec, ProcessOutput, ProcessRunner, SystemRunner};
pub use state::{BuildAttempt, Phase};

use crate::error::{AccelError, AccelResult};
use std::future::Future;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Max number of output lines to include in error diagnostics.
const ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of subprocess output for error diagnostics.
pub fn error_output_tail(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Run `work` until it finishes or the operator presses Ctrl-C
///
/// Once tokio has taken over SIGINT the default handler is gone for the
/// rest of the process, so the top level has to listen for it too.
/// Dropping `work` kills any subprocess group it is waiting on.
pub async fn until_interrupted<F, T>(work: F) -> AccelResult<T>
where
    F: Future<Output = AccelResult<T>>,
{
    tokio::select! {
        result = work => result,
        Ok(()) = tokio::signal::ctrl_c() => Err(AccelError::Interrupted),
    }
}

/// Stream stdout+stderr from a child process into `collected`, calling
/// `on_output` for each line as it arrives.
///
/// Lines are pushed as they are read, so a caller that abandons this future
/// on timeout still has everything printed so far.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    collected: &mut Vec<String>,
    on_output: &(dyn Fn(String) + Send + Sync),
) {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return;
    };

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        collected.push(line);
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        collected.push(line);
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_lines() {
        let output: String = (0..120).map(|i| format!("line {i}\n")).collect();
        let tail = error_output_tail(&output);
        assert_eq!(tail.lines().count(), ERROR_TAIL_LINES);
        assert!(tail.starts_with("line 70"));
        assert!(tail.ends_with("line 119"));
    }

    #[test]
    fn tail_of_short_output_is_unchanged() {
        assert_eq!(error_output_tail("a\nb"), "a\nb");
    }
}
