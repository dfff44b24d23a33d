//! Finalized report and polling snapshot types.

use crate::ids::TaskRunId;
use crate::status::TaskStatus;
use crate::task::TaskRun;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cheap polling view of a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: TaskStatus,
    pub is_complete: bool,
}

impl StatusSnapshot {
    /// Snapshot for the given status, with `is_complete` derived.
    pub fn of(status: TaskStatus) -> Self {
        Self {
            status,
            is_complete: status.is_terminal(),
        }
    }
}

impl From<&TaskRun> for StatusSnapshot {
    fn from(task: &TaskRun) -> Self {
        Self::of(task.status)
    }
}

/// The caller-visible terminal result of a task run.
///
/// Built by the finalizer exactly once per run; repeated finalization
/// returns the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    /// Run this report belongs to.
    pub task_run_id: TaskRunId,

    /// Terminal status the run finished with.
    pub status: TaskStatus,

    /// Display title, present for completed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Report body, present for completed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Failure message, present for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the run reached its terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl FinalReport {
    /// Build the report for a terminal task run.
    pub fn from_task(task: &TaskRun) -> Self {
        let title = match task.status {
            TaskStatus::Completed => Some(report_title(task)),
            _ => None,
        };
        Self {
            task_run_id: task.id.clone(),
            status: task.status,
            title,
            content: task.output.clone(),
            error: task.error.clone(),
            completed_at: task.completed_at,
        }
    }
}

/// Derive a display title from the request.
fn report_title(task: &TaskRun) -> String {
    let mut title = format!("{} Research Report", task.request.topic);
    if let Some(region) = &task.request.region {
        title.push_str(" - ");
        title.push_str(region);
    }
    title
}
