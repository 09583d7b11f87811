//! Typed error hierarchy for the night-shift runner.
//!
//! Four enums cover the seams of the system:
//! - `RunnerError`: engine-level failures surfaced to the caller (never logged per task)
//! - `AttemptError`: per-task failures recorded into the run report
//! - `TransitionError`: impossible `(stage, outcome)` pairs fed to the policy
//! - `StoreError`: task store failures

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::task::Stage;

/// Errors from the runner engine itself.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("A night-shift run is already active")]
    AlreadyActive,

    #[error("Task store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to write run report: {0}")]
    Report(#[source] anyhow::Error),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Errors attached to a single task attempt.
///
/// Each variant maps onto one classification of the failure taxonomy via
/// [`AttemptError::is_crash`]: crashes are never retried, everything else is.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AttemptError {
    #[error("No agent profile named '{name}' for stage {stage}")]
    ProfileNotFound { name: String, stage: Stage },

    #[error("Invalid agent profile '{name}': {message}")]
    InvalidProfile { name: String, message: String },

    #[error("Failed to launch '{cli}': {message}")]
    ProcessLaunch { cli: String, message: String },

    #[error("Failed to build prompt: {0}")]
    Prompt(String),

    #[error("Process timed out after {}s", .0.as_secs())]
    ProcessTimeout(Duration),

    #[error("{limit} limit exceeded: used {used}, allowed {allowed}")]
    LimitExceeded {
        limit: &'static str,
        used: String,
        allowed: String,
    },

    #[error("Process exited with code {exit_code}: {stderr_tail}")]
    NonZeroExit { exit_code: i32, stderr_tail: String },

    #[error("Agent reported an error: {0}")]
    AgentReported(String),

    #[error("Unparsable agent output: {0}")]
    UnparsableOutput(String),
}

impl AttemptError {
    /// Whether this error means the attempt never really ran.
    pub fn is_crash(&self) -> bool {
        match self {
            Self::ProfileNotFound { .. }
            | Self::InvalidProfile { .. }
            | Self::ProcessLaunch { .. }
            | Self::Prompt(_) => true,
            Self::ProcessTimeout(_)
            | Self::LimitExceeded { .. }
            | Self::NonZeroExit { .. }
            | Self::AgentReported(_)
            | Self::UnparsableOutput(_) => false,
        }
    }
}

/// Raised when the stage transition policy is handed a pair it has no edge for.
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("Stage {0} is not executable")]
    NotExecutable(Stage),

    #[error("No transition for outcome {outcome} at stage {stage}")]
    Unexpected { stage: Stage, outcome: &'static str },
}

/// Errors from the markdown task store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task {0} not found")]
    NotFound(String),

    #[error("Invalid frontmatter in {path}: {message}")]
    Frontmatter { path: PathBuf, message: String },

    #[error("Task store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
