//! Progress events emitted by a task run.

use crate::status::TaskStatus;
use serde::{Deserialize, Serialize};

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A typed, time-ordered message describing a task run's evolution.
///
/// Events are totally ordered per run by emission time, but the channel
/// makes no uniqueness guarantee: consumers must tolerate duplicate or
/// stale `Progress`/`Log` events and treat only
/// `Status { is_complete: true }` as authoritative for termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The run moved to a new status.
    Status {
        status: TaskStatus,
        is_complete: bool,
    },
    /// Source-processing counters advanced.
    Progress {
        sources_processed: u32,
        sources_total: u32,
        #[serde(default)]
        recent_sources: Vec<String>,
    },
    /// A free-text progress message from the backend.
    Log { level: LogLevel, message: String },
    /// The backend reported an error condition.
    Error { message: String },
}

impl ProgressEvent {
    /// Status event for the given status, with `is_complete` derived.
    pub fn status(status: TaskStatus) -> Self {
        Self::Status {
            status,
            is_complete: status.is_terminal(),
        }
    }

    /// Returns true for the authoritative terminal event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Status { is_complete, .. } if *is_complete)
    }
}
