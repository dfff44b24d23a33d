//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::Arc;

use reportrun_core::TaskStatus;

use crate::state::AppState;

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_task_metrics(state, &mut output).await;
    collect_delivery_metrics(state, &mut output).await;

    output
}

/// Collect task metrics by status.
async fn collect_task_metrics(state: &Arc<AppState>, output: &mut String) {
    let tasks = state.tasks.read().await;

    let mut running = 0u64;
    let mut completed = 0u64;
    let mut failed = 0u64;

    for task in tasks.values() {
        match task.status {
            TaskStatus::Running => running += 1,
            TaskStatus::Completed => completed += 1,
            TaskStatus::Failed => failed += 1,
        }
    }

    writeln!(
        output,
        "# HELP reportrun_tasks_total Total number of task runs by status"
    )
    .ok();
    writeln!(output, "# TYPE reportrun_tasks_total gauge").ok();
    writeln!(output, "reportrun_tasks_total{{status=\"running\"}} {running}").ok();
    writeln!(
        output,
        "reportrun_tasks_total{{status=\"completed\"}} {completed}"
    )
    .ok();
    writeln!(output, "reportrun_tasks_total{{status=\"failed\"}} {failed}").ok();
}

/// Collect progress-channel and finalizer metrics.
async fn collect_delivery_metrics(state: &Arc<AppState>, output: &mut String) {
    let channels = state.channels.read().await.len();
    let finalized = state.reports.read().await.len();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP reportrun_progress_channels Number of live progress channels"
    )
    .ok();
    writeln!(output, "# TYPE reportrun_progress_channels gauge").ok();
    writeln!(output, "reportrun_progress_channels {channels}").ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP reportrun_reports_finalized Number of finalized task runs"
    )
    .ok();
    writeln!(output, "# TYPE reportrun_reports_finalized gauge").ok();
    writeln!(output, "reportrun_reports_finalized {finalized}").ok();
}
