//! Shared application state: task registry, progress channels, and the
//! finalizer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use reportrun_core::{
    CoreError, FinalReport, ProgressEvent, ResearchRequest, StatusSnapshot, TaskRun, TaskRunId,
    TaskStatus,
};

use crate::config::ServerConfig;
use crate::pipeline::{ProgressSink, ResearchPipeline};

/// Errors from the server-side resolve path.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Task run not found: {0}")]
    NotFound(TaskRunId),

    #[error("Task run did not reach a terminal state within {0:?}")]
    Timeout(Duration),
}

/// Shared application state.
pub struct AppState {
    /// Server configuration.
    pub config: ServerConfig,

    /// Admission gate for new task runs.
    pub admission: crate::admission::AdmissionController,

    /// Task runs indexed by id.
    pub tasks: RwLock<HashMap<TaskRunId, TaskRun>>,

    /// Live progress channels indexed by task run id.
    pub channels: RwLock<HashMap<TaskRunId, broadcast::Sender<ProgressEvent>>>,

    /// Finalized reports indexed by task run id.
    pub reports: RwLock<HashMap<TaskRunId, FinalReport>>,

    /// Research execution backend.
    pipeline: Arc<dyn ResearchPipeline>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(config: ServerConfig, pipeline: Arc<dyn ResearchPipeline>) -> Arc<Self> {
        let admission = crate::admission::AdmissionController::new(config.limiters.clone());
        Arc::new(Self {
            config,
            admission,
            tasks: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            reports: RwLock::new(HashMap::new()),
            pipeline,
        })
    }

    /// Register a new running task and start its pipeline.
    pub async fn create_task(state: &Arc<AppState>, request: ResearchRequest) -> TaskRun {
        let task = TaskRun::new(request);
        let id = task.id.clone();

        let (tx, _) = broadcast::channel(state.config.stream_channel_capacity);
        state.channels.write().await.insert(id.clone(), tx);
        state.tasks.write().await.insert(id.clone(), task.clone());

        info!(task_id = %id, topic = %task.request.topic, "Task run created");

        let pipeline = Arc::clone(&state.pipeline);
        let sink = ProgressSink::new(Arc::clone(state), id);
        let spawned = task.clone();
        tokio::spawn(async move {
            pipeline.run(spawned, sink).await;
        });

        task
    }

    /// Subscribe to a task's live progress channel.
    pub async fn subscribe(&self, id: &TaskRunId) -> Option<broadcast::Receiver<ProgressEvent>> {
        self.channels.read().await.get(id).map(|tx| tx.subscribe())
    }

    /// Cheap status snapshot of a task run.
    pub async fn snapshot(&self, id: &TaskRunId) -> Option<StatusSnapshot> {
        self.tasks.read().await.get(id).map(StatusSnapshot::from)
    }

    /// Clone of the stored task run.
    pub async fn get_task(&self, id: &TaskRunId) -> Option<TaskRun> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Fold an event into the stored run and forward it to subscribers.
    pub async fn publish(&self, id: &TaskRunId, event: ProgressEvent) {
        {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(id) {
                Some(task) => task.apply_event(&event),
                None => {
                    warn!(task_id = %id, "Dropping event for unknown task");
                    return;
                }
            }
        }
        self.broadcast(id, event).await;
    }

    /// Mark a task completed and announce the terminal status.
    pub async fn complete_task(&self, id: &TaskRunId, output: impl Into<String>) {
        {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(id) {
                Some(task) => task.complete(output),
                None => return,
            }
        }
        info!(task_id = %id, "Task run completed");
        self.broadcast(id, ProgressEvent::status(TaskStatus::Completed))
            .await;
    }

    /// Mark a task failed and announce the terminal status.
    pub async fn fail_task(&self, id: &TaskRunId, error: impl Into<String>) {
        let error = error.into();
        {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(id) {
                Some(task) => task.fail(error.clone()),
                None => return,
            }
        }
        warn!(task_id = %id, error = %error, "Task run failed");
        self.broadcast(id, ProgressEvent::status(TaskStatus::Failed))
            .await;
    }

    /// Block until the run is terminal or the timeout elapses.
    ///
    /// This is the server half of the fallback-resolve tier: the caller
    /// parks here instead of re-driving its own stream.
    pub async fn wait_terminal(
        &self,
        id: &TaskRunId,
        timeout: Duration,
    ) -> Result<TaskRun, ResolveError> {
        let poll_interval = self.config.resolve_poll_interval();
        let start = tokio::time::Instant::now();

        loop {
            let task = self
                .get_task(id)
                .await
                .ok_or_else(|| ResolveError::NotFound(id.clone()))?;

            if task.is_terminal() {
                return Ok(task);
            }

            if start.elapsed() > timeout {
                return Err(ResolveError::Timeout(timeout));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Convert a terminal run into its final report, exactly once.
    ///
    /// The first caller after the terminal transition stores the
    /// report; every later caller gets the stored value back unchanged.
    /// The check-and-set runs under one write lock, so concurrent
    /// callers cannot both build the report.
    pub async fn finalize(&self, id: &TaskRunId) -> Result<FinalReport, CoreError> {
        let mut reports = self.reports.write().await;
        if let Some(report) = reports.get(id) {
            return Ok(report.clone());
        }

        let tasks = self.tasks.read().await;
        let task = tasks
            .get(id)
            .ok_or_else(|| CoreError::TaskNotFound(id.to_string()))?;
        if !task.is_terminal() {
            return Err(CoreError::StillRunning(id.to_string()));
        }

        let report = FinalReport::from_task(task);
        reports.insert(id.clone(), report.clone());
        info!(task_id = %id, status = ?report.status, "Task run finalized");
        Ok(report)
    }

    async fn broadcast(&self, id: &TaskRunId, event: ProgressEvent) {
        if let Some(tx) = self.channels.read().await.get(id) {
            // Send fails only when nobody is subscribed; that is fine,
            // the registry still holds the folded state.
            let _ = tx.send(event);
        }
    }
}
