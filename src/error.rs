//! Structured error types for engine operations.

use crate::types::TaskStatus;
use thiserror::Error;

/// Errors surfaced by the store, queue, and scheduler.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A task with the same id already exists; nothing was mutated.
    #[error("task already exists: {0}")]
    AlreadyExists(String),

    /// Operation against an unknown task id.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A claim was attempted while at least one dependency is incomplete.
    /// The task has been moved to BLOCKED and will be re-offered once the
    /// blocking dependency completes.
    #[error("task {task_id} blocked by incomplete dependencies: {blockers:?}")]
    DependencyUnsatisfied {
        task_id: String,
        blockers: Vec<String>,
    },

    /// The requested status change is not in the transition table.
    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The conditional claim write affected zero rows: another worker won
    /// the race or the task left the claimable state.
    #[error("claim conflict on task {0}")]
    ClaimConflict(String),

    /// `result` is write-once; a second write was rejected.
    #[error("result already written for task {0}")]
    ResultAlreadyWritten(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(#[from] refinery::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the error is a benign outcome of racing workers rather than a
    /// fault: the caller should move on to the next candidate.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            EngineError::ClaimConflict(_) | EngineError::DependencyUnsatisfied { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
