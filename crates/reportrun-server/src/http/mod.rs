//! HTTP server for the delivery subsystem.
//!
//! Provides endpoints for:
//! - Task admission (`POST /tasks`)
//! - Live progress streaming (`GET /tasks/:task_id/stream`)
//! - Polling snapshots (`GET /tasks/:task_id/status`)
//! - Server-side resolve (`POST /tasks/:task_id/resolve`)
//! - Finalization (`POST /tasks/:task_id/finalize`)
//! - Health check (`/health`) and Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod handlers;
pub mod responses;

use responses::{ErrorResponse, RateLimitResponse, ResolveResponse};

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Admission + delivery routes
        .route("/tasks", post(handlers::create_task))
        .route("/tasks/:task_id/stream", get(handlers::stream_events))
        .route("/tasks/:task_id/status", get(handlers::task_status))
        .route("/tasks/:task_id/resolve", post(handlers::resolve_task))
        .route("/tasks/:task_id/finalize", post(handlers::finalize_task))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// API errors with proper HTTP status codes.
#[derive(Debug)]
pub enum ApiError {
    /// Request body failed validation.
    Validation { message: String },
    /// Unknown task run id.
    NotFound,
    /// Admission denied; retry later.
    RateLimited { retry_after_secs: u64 },
    /// Finalize requested before the run was terminal.
    StillRunning,
    /// Resolve gave up before the run was terminal.
    ResolveTimeout,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::Validation { message } => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse { error: message }),
            )
                .into_response(),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "task run not found".to_string(),
                }),
            )
                .into_response(),
            ApiError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(RateLimitResponse {
                    error: "rate limit exceeded".to_string(),
                    retry_after_seconds: retry_after_secs,
                }),
            )
                .into_response(),
            ApiError::StillRunning => (
                StatusCode::CONFLICT,
                Json(ResolveResponse::still_running()),
            )
                .into_response(),
            ApiError::ResolveTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                Json(ResolveResponse::still_running()),
            )
                .into_response(),
        }
    }
}
