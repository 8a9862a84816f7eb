//! Typed error hierarchy for the conductor engine.
//!
//! Three top-level enums cover the three failure surfaces:
//! - `PhaseError`: a single phase could not run or did not succeed
//! - `OrchestratorError`: graph, audit, validation and quality-gate failures
//! - `WorkflowNameError`: a workflow identity rejected before any filesystem access

use crate::audit::PhaseStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from a single phase execution.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error(
        "Phase {phase} is blocked: dependency {dependency} is {}",
        describe_dependency(.dependency_status)
    )]
    Blocked {
        phase: String,
        dependency: String,
        dependency_status: Option<PhaseStatus>,
    },

    #[error("Phase {phase} failed with exit code {exit_code} (log: {})", .log.display())]
    Failed {
        phase: String,
        exit_code: i32,
        log: PathBuf,
    },

    #[error("Phase {phase} timed out after {timeout_secs}s (log: {})", .log.display())]
    TimedOut {
        phase: String,
        timeout_secs: u64,
        log: PathBuf,
    },

    #[error("Phase {phase} was killed (log: {})", .log.display())]
    Killed { phase: String, log: PathBuf },

    #[error("Failed to spawn phase {phase}: {source}")]
    SpawnFailed {
        phase: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open log sink at {path}: {source}")]
    LogSinkFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

fn describe_dependency(status: &Option<PhaseStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "absent from the audit log".to_string(),
    }
}

/// Errors from the orchestration layer above individual phases.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid phase graph: {0}")]
    InvalidGraph(String),

    #[error("Validation level {level} exhausted after {attempts} attempts")]
    Exhausted { level: String, attempts: u32 },

    #[error("Quality score {score} is below the minimum of {minimum}")]
    ScoreBelowThreshold { score: f32, minimum: f32 },

    #[error("No quality score found in the output of phase {phase}")]
    ScoreNotFound { phase: String },

    #[error("Failed to append to audit log at {path}: {source}")]
    AuditWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Workflow aborted at {at}")]
    Aborted { at: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Reasons a workflow name is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowNameError {
    #[error("Workflow name must not be empty")]
    Empty,

    #[error("Workflow name is {len} characters long; the maximum is {max}")]
    TooLong { len: usize, max: usize },

    #[error("Workflow name must not contain path separators or '..'")]
    PathTraversal,

    #[error("Workflow name contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("Workflow name {0:?} is reserved")]
    Reserved(String),
}
