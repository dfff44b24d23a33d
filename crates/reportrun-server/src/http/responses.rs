//! HTTP request and response types.

use serde::{Deserialize, Serialize};

use reportrun_core::{FinalReport, ResearchRequest, StatusSnapshot};

// ============================================================================
// Task creation types
// ============================================================================

/// Request body for `POST /tasks`.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// Subject of the report.
    pub topic: String,

    /// Optional geographic focus.
    #[serde(default)]
    pub region: Option<String>,

    /// Optional free-text refinement.
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateTaskRequest {
    /// Convert into the domain request.
    pub fn into_request(self) -> ResearchRequest {
        ResearchRequest {
            topic: self.topic.trim().to_string(),
            region: self.region.filter(|r| !r.trim().is_empty()),
            notes: self.notes.filter(|n| !n.trim().is_empty()),
        }
    }
}

/// Response body for `POST /tasks`.
#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    /// Id of the admitted run.
    pub task_run_id: String,

    /// Where to attach for live progress.
    pub stream_url: String,
}

// ============================================================================
// Status / resolve types
// ============================================================================

/// Response body for `GET /tasks/:task_id/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub task_run_id: String,
    pub status: reportrun_core::TaskStatus,
    pub is_complete: bool,
}

impl StatusResponse {
    pub fn new(task_run_id: &str, snapshot: StatusSnapshot) -> Self {
        Self {
            task_run_id: task_run_id.to_string(),
            status: snapshot.status,
            is_complete: snapshot.is_complete,
        }
    }
}

/// Response body shared by the resolve and finalize endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    /// Whether the call produced a finalized report.
    pub success: bool,

    /// Whether the run had reached a terminal state.
    pub task_completed: bool,

    /// The finalized report, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<FinalReport>,

    /// Error message, when the call did not succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResolveResponse {
    /// A terminal run with its finalized report.
    pub fn resolved(report: FinalReport) -> Self {
        Self {
            success: true,
            task_completed: true,
            report: Some(report),
            error: None,
        }
    }

    /// The run has not reached a terminal state.
    pub fn still_running() -> Self {
        Self {
            success: false,
            task_completed: false,
            report: None,
            error: Some("task run is still running".to_string()),
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error response for denied admissions.
#[derive(Debug, Serialize)]
pub struct RateLimitResponse {
    pub error: String,
    pub retry_after_seconds: u64,
}
