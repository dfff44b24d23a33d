//! Status enum for Task Runs.

use serde::{Deserialize, Serialize};

/// Status of a Task Run.
///
/// A run starts in `Running` and moves to exactly one of the terminal
/// states. Success and failure are delivered through the same terminal
/// path; consumers distinguish them only by the carried status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is being executed by the research backend.
    #[default]
    Running,
    /// Task finished and produced a report.
    Completed,
    /// Task finished without producing a report.
    Failed,
}

impl TaskStatus {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}
