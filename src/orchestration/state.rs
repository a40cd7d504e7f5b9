//! Per-invocation state machine bookkeeping

use std::fmt;

/// Phases of one accelerated install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Unpack from the local source index, network disabled
    LocalResolve,
    /// Fetch missing source archives into the local index
    Download,
    Build,
    Install,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::LocalResolve => "local-resolve",
            Phase::Download => "download",
            Phase::Build => "build",
            Phase::Install => "install",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Progress of the current invocation. Never persisted.
#[derive(Debug, Clone)]
pub struct BuildAttempt {
    pub phase: Phase,
    /// Network download attempts so far, across the whole run
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl BuildAttempt {
    pub fn new() -> Self {
        Self {
            phase: Phase::LocalResolve,
            attempt_count: 0,
            last_error: None,
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        tracing::debug!("Phase {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Record a failed phase and keep its output for the final diagnosis
    pub fn fail(&mut self, output: String) {
        self.last_error = Some(output);
    }

    /// Whether another network attempt fits under `limit`
    pub fn can_download(&self, limit: u32) -> bool {
        self.attempt_count < limit
    }
}

impl Default for BuildAttempt {
    fn default() -> Self {
        Self::new()
    }
}
