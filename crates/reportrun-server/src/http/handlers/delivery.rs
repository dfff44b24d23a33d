//! Status, resolve, and finalize handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use reportrun_core::{CoreError, TaskRunId};

use crate::http::responses::{ResolveResponse, StatusResponse};
use crate::http::ApiError;
use crate::state::{AppState, ResolveError};

/// GET /tasks/:task_id/status - cheap polling snapshot.
pub async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Response {
    let id = TaskRunId::new(&task_id);
    match state.snapshot(&id).await {
        Some(snapshot) => {
            (StatusCode::OK, Json(StatusResponse::new(&task_id, snapshot))).into_response()
        }
        None => ApiError::NotFound.into_response(),
    }
}

/// POST /tasks/:task_id/resolve - block until terminal, then finalize.
pub async fn resolve_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Response {
    let id = TaskRunId::new(&task_id);

    match state.wait_terminal(&id, state.config.resolve_timeout()).await {
        Ok(_) => finalize_response(&state, &id).await,
        Err(ResolveError::NotFound(_)) => ApiError::NotFound.into_response(),
        Err(ResolveError::Timeout(timeout)) => {
            warn!(task_id = %id, ?timeout, "Resolve timed out");
            ApiError::ResolveTimeout.into_response()
        }
    }
}

/// POST /tasks/:task_id/finalize - idempotent terminal conversion.
pub async fn finalize_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Response {
    let id = TaskRunId::new(&task_id);
    finalize_response(&state, &id).await
}

async fn finalize_response(state: &Arc<AppState>, id: &TaskRunId) -> Response {
    match state.finalize(id).await {
        Ok(report) => (StatusCode::OK, Json(ResolveResponse::resolved(report))).into_response(),
        Err(CoreError::TaskNotFound(_)) => ApiError::NotFound.into_response(),
        Err(CoreError::StillRunning(_)) => ApiError::StillRunning.into_response(),
        Err(other) => {
            warn!(task_id = %id, error = %other, "Finalize failed");
            ApiError::Validation {
                message: other.to_string(),
            }
            .into_response()
        }
    }
}
