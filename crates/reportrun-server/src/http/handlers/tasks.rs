//! Task admission handler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, warn};

use crate::admission::Admission;
use crate::http::responses::{CreateTaskRequest, CreateTaskResponse};
use crate::http::ApiError;
use crate::state::AppState;

/// POST /tasks - admit and start a new task run.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    json_result: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Response {
    let req = match json_result {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!(error = %rejection, "Invalid JSON in request body");
            return ApiError::Validation {
                message: rejection.body_text(),
            }
            .into_response();
        }
    };

    // Validation happens before admission so a malformed request never
    // consumes quota.
    if req.topic.trim().is_empty() {
        return ApiError::Validation {
            message: "topic is required".to_string(),
        }
        .into_response();
    }

    let client_key = addr.ip().to_string();
    match state.admission.admit(&client_key).await {
        Admission::Allow => {}
        denied @ Admission::Deny { .. } => {
            let retry_after_secs = denied.retry_after_secs().unwrap_or(0);
            warn!(client = %client_key, retry_after_secs, "Admission denied");
            return ApiError::RateLimited { retry_after_secs }.into_response();
        }
    }

    let task = AppState::create_task(&state, req.into_request()).await;
    info!(task_id = %task.id, client = %client_key, "Task run admitted");

    let response = CreateTaskResponse {
        task_run_id: task.id.to_string(),
        stream_url: format!("/tasks/{}/stream", task.id),
    };
    (StatusCode::OK, Json(response)).into_response()
}
