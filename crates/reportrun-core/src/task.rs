//! Task Run and research request types.

use crate::event::ProgressEvent;
use crate::ids::TaskRunId;
use crate::status::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of entries kept in the recent-source list.
pub const RECENT_SOURCES_MAX: usize = 10;

/// Caller-supplied description of the research to perform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    /// Subject of the report.
    pub topic: String,

    /// Optional geographic focus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Optional free-text refinement of the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ResearchRequest {
    /// Create a request for the given topic.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            region: None,
            notes: None,
        }
    }

    /// Builder method to set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Builder method to set the notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Source-processing counters for a task run.
///
/// Counters only advance; stale updates are ignored. The recent-source
/// list is bounded to the last [`RECENT_SOURCES_MAX`] entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceProgress {
    /// Number of sources the backend has processed so far.
    pub sources_processed: u32,

    /// Number of sources the backend is considering.
    pub sources_total: u32,

    /// Most recently processed sources, oldest first.
    pub recent_sources: Vec<String>,
}

impl SourceProgress {
    /// Fold a progress update into the counters.
    pub fn record(&mut self, processed: u32, total: u32, recent: &[String]) {
        self.sources_processed = self.sources_processed.max(processed);
        self.sources_total = self.sources_total.max(total);

        for source in recent {
            if self.recent_sources.last() != Some(source) {
                self.recent_sources.push(source.clone());
            }
        }
        if self.recent_sources.len() > RECENT_SOURCES_MAX {
            let excess = self.recent_sources.len() - RECENT_SOURCES_MAX;
            self.recent_sources.drain(..excess);
        }
    }
}

/// One execution instance of the research backend.
///
/// Created when admission succeeds; mutated only by the backend
/// pipeline until it reaches a terminal status, after which the record
/// is frozen (`completed_at` is stamped exactly once at the terminal
/// transition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    /// Unique run identifier.
    pub id: TaskRunId,

    /// The request that produced this run.
    pub request: ResearchRequest,

    /// Current status.
    pub status: TaskStatus,

    /// Source-processing progress.
    pub progress: SourceProgress,

    /// When the run was created.
    pub created_at: DateTime<Utc>,

    /// When the run reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,

    /// Report body, present once completed.
    pub output: Option<String>,

    /// Failure message, present once failed.
    pub error: Option<String>,
}

impl TaskRun {
    /// Create a new running task for the given request.
    pub fn new(request: ResearchRequest) -> Self {
        Self {
            id: TaskRunId::generate(),
            request,
            status: TaskStatus::Running,
            progress: SourceProgress::default(),
            created_at: Utc::now(),
            completed_at: None,
            output: None,
            error: None,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskRunId) -> Self {
        self.id = id;
        self
    }

    /// Check if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the run as completed with the produced report body.
    pub fn complete(&mut self, output: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.status = TaskStatus::Completed;
        self.output = Some(output.into());
        self.completed_at = Some(Utc::now());
    }

    /// Mark the run as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Fold a progress event into the stored run state.
    ///
    /// Terminal runs ignore further events. Log events carry no state;
    /// error events record the latest message without terminating the
    /// run (only a status event is authoritative for termination).
    pub fn apply_event(&mut self, event: &ProgressEvent) {
        if self.is_terminal() {
            return;
        }
        match event {
            ProgressEvent::Status { status, .. } => {
                if status.is_terminal() {
                    self.status = *status;
                    self.completed_at = Some(Utc::now());
                }
            }
            ProgressEvent::Progress {
                sources_processed,
                sources_total,
                recent_sources,
            } => {
                self.progress
                    .record(*sources_processed, *sources_total, recent_sources);
            }
            ProgressEvent::Log { .. } => {}
            ProgressEvent::Error { message } => {
                self.error = Some(message.clone());
            }
        }
    }
}
