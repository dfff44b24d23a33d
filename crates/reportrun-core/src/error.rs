//! Core domain errors.

use thiserror::Error;

/// Core domain errors for ReportRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Task run not found.
    #[error("Task run not found: {0}")]
    TaskNotFound(String),

    /// Finalization requested before the run reached a terminal state.
    #[error("Task run still running: {0}")]
    StillRunning(String),

    /// Invalid request input.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
