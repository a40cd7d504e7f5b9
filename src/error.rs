//! Error types for accel
//!
//! All modules use `AccelResult<T>` as their return type. Each fatal class
//! maps to its own process exit code so scripts can tell failures apart.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for accel operations
pub type AccelResult<T> = Result<T, AccelError>;

/// All errors that can occur in accel
#[derive(Error, Debug)]
pub enum AccelError {
    // Acquisition errors
    #[error("Failed to download source distributions after {attempts} attempt(s)")]
    AcquisitionFailed { attempts: u32, output: String },

    #[error("Package manager output did not match any known requirement format")]
    ExtractionFormat { output: String },

    // Build errors
    #[error("Failed to build binary distribution of {name} ({version})")]
    BuildFailed {
        name: String,
        version: String,
        output: String,
    },

    #[error("Build of {name} ({version}) failed and no remediation is available: {reason}")]
    RemediationUnavailable {
        name: String,
        version: String,
        reason: String,
        output: String,
    },

    #[error("Directory {path} ({name} {version}) doesn't contain a source distribution")]
    InvalidSourceDistribution {
        name: String,
        version: String,
        path: PathBuf,
    },

    // Install errors
    #[error("Failed to install {name} ({version}): {reason}")]
    InstallFailed {
        name: String,
        version: String,
        reason: String,
    },

    // Cache errors
    #[error("Cache backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Remote cache bucket not found: {0}")]
    RemoteBucketMissing(String),

    #[error("Corrupt cache entry {key}: {reason}")]
    CorruptArtifact { key: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid value for {key}: {reason}")]
    ConfigValue { key: String, reason: String },

    #[error("Invalid pattern {pattern:?}: {reason}")]
    PatternInvalid { pattern: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Runtime probe failed: {0}")]
    RuntimeProbe(String),

    #[error("Interrupted")]
    Interrupted,

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AccelError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a backend unavailable error
    pub fn backend(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code for this error class
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::AcquisitionFailed { .. } => 2,
            Self::ExtractionFormat { .. } => 3,
            Self::BuildFailed { .. } | Self::InvalidSourceDistribution { .. } => 4,
            Self::RemediationUnavailable { .. } => 5,
            Self::InstallFailed { .. } | Self::CorruptArtifact { .. } => 6,
            Self::Interrupted => 130,
            _ => 1,
        }
    }

    /// Captured subprocess output attached to this error, if any
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::AcquisitionFailed { output, .. }
            | Self::ExtractionFormat { output }
            | Self::BuildFailed { output, .. }
            | Self::RemediationUnavailable { output, .. } => {
                Some(output.as_str()).filter(|o| !o.trim().is_empty())
            }
            _ => None,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::AcquisitionFailed { .. } => {
                Some("Check network access to the package index, or raise network_retry_limit")
            }
            Self::ExtractionFormat { .. } => {
                Some("The package manager's output format changed; update [extract] patterns")
            }
            Self::RemediationUnavailable { .. } => Some(
                "Install the missing system packages manually, or add a [[remediation.rules]] entry",
            ),
            Self::RemoteBucketMissing(_) => {
                Some("Create the bucket, or set remote.create_bucket = true")
            }
            _ => None,
        }
    }
}
