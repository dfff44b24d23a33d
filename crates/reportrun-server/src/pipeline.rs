//! Research execution seam.
//!
//! The actual research engine is external to this subsystem; the
//! server only requires something that drives a task run to a terminal
//! state while reporting progress through a [`ProgressSink`]. The
//! bundled [`StubPipeline`] is a deterministic stand-in used by the
//! default binary and by tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use reportrun_core::{LogLevel, ProgressEvent, TaskRun, TaskRunId};

use crate::state::AppState;

/// Handle through which a pipeline reports progress for one task run.
pub struct ProgressSink {
    state: Arc<AppState>,
    id: TaskRunId,
}

impl ProgressSink {
    pub(crate) fn new(state: Arc<AppState>, id: TaskRunId) -> Self {
        Self { state, id }
    }

    /// Report source-processing counters.
    pub async fn progress(&self, processed: u32, total: u32, recent: Vec<String>) {
        self.state
            .publish(
                &self.id,
                ProgressEvent::Progress {
                    sources_processed: processed,
                    sources_total: total,
                    recent_sources: recent,
                },
            )
            .await;
    }

    /// Emit a free-text progress message.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.state
            .publish(
                &self.id,
                ProgressEvent::Log {
                    level,
                    message: message.into(),
                },
            )
            .await;
    }

    /// Report a non-terminal error condition.
    pub async fn error(&self, message: impl Into<String>) {
        self.state
            .publish(
                &self.id,
                ProgressEvent::Error {
                    message: message.into(),
                },
            )
            .await;
    }

    /// Terminate the run successfully with the report body.
    pub async fn complete(&self, output: impl Into<String>) {
        self.state.complete_task(&self.id, output).await;
    }

    /// Terminate the run with a failure.
    pub async fn fail(&self, message: impl Into<String>) {
        self.state.fail_task(&self.id, message).await;
    }
}

/// A backend capable of executing research task runs.
#[async_trait]
pub trait ResearchPipeline: Send + Sync + 'static {
    /// Drive the task to a terminal state, reporting through the sink.
    async fn run(&self, task: TaskRun, sink: ProgressSink);
}

/// Deterministic placeholder pipeline.
///
/// Walks a fixed number of synthetic sources on a fixed cadence and
/// then completes with a generated report body.
pub struct StubPipeline {
    /// Number of synthetic sources to process.
    pub steps: u32,

    /// Delay between steps.
    pub step_delay: Duration,
}

impl Default for StubPipeline {
    fn default() -> Self {
        Self {
            steps: 8,
            step_delay: Duration::from_millis(500),
        }
    }
}

#[async_trait]
impl ResearchPipeline for StubPipeline {
    async fn run(&self, task: TaskRun, sink: ProgressSink) {
        sink.log(
            LogLevel::Info,
            format!("starting research on \"{}\"", task.request.topic),
        )
        .await;

        let slug: String = task
            .request
            .topic
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .to_lowercase();

        for step in 1..=self.steps {
            tokio::time::sleep(self.step_delay).await;
            sink.progress(
                step,
                self.steps,
                vec![format!("https://sources.example/{slug}/{step}")],
            )
            .await;
        }

        sink.log(LogLevel::Info, "compiling report").await;
        sink.complete(render_report(&task)).await;
    }
}

fn render_report(task: &TaskRun) -> String {
    let mut body = format!("# {}\n\n", task.request.topic);
    if let Some(region) = &task.request.region {
        body.push_str(&format!("Region: {region}\n\n"));
    }
    if let Some(notes) = &task.request.notes {
        body.push_str(&format!("Scope notes: {notes}\n\n"));
    }
    body.push_str("## Findings\n\nNo live research backend is configured; this report was produced by the stub pipeline.\n");
    body
}
