//! The progress-channel contract the coordinator consumes.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Deserialize;

use reportrun_core::{FinalReport, ProgressEvent, StatusSnapshot, TaskRunId};

use crate::error::ClientError;

/// A live, push-based sequence of progress events.
///
/// The server may close the stream at any time; stream items surface
/// transport errors in-band so the coordinator can drive recovery.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ProgressEvent, ClientError>> + Send + Sync>>;

/// Server-side outcome of a resolve call.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    /// The run is terminal and was finalized.
    Terminal(FinalReport),
    /// The server gave up waiting before the run finished.
    StillRunning,
}

/// Response to a task submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Id of the admitted run.
    pub task_run_id: String,

    /// Where to attach for live progress.
    pub stream_url: String,
}

/// Operations the delivery coordinator depends on.
///
/// [`crate::http::HttpChannel`] implements this against the delivery
/// server; tests script their own implementation.
#[async_trait]
pub trait ProgressChannel: Send + Sync {
    /// Open the live event stream for a task run.
    async fn open_stream(&self, id: &TaskRunId) -> Result<EventStream, ClientError>;

    /// Cheap status snapshot.
    async fn poll_status(&self, id: &TaskRunId) -> Result<StatusSnapshot, ClientError>;

    /// Block server-side until the run is terminal or the server's own
    /// timeout elapses.
    async fn resolve(&self, id: &TaskRunId) -> Result<ResolveOutcome, ClientError>;

    /// Idempotent conversion of a terminal run into its final report.
    async fn finalize(&self, id: &TaskRunId) -> Result<FinalReport, ClientError>;
}
