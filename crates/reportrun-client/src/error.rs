//! Error types for the delivery client.

use thiserror::Error;

/// Errors that can occur when talking to the delivery server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to establish or keep a connection.
    #[error("connection failed: {0}")]
    Connection(String),

    /// HTTP error from the transport.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Admission was denied.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server rejected the request permanently.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The task run has not reached a terminal state.
    #[error("task run is still running")]
    StillRunning,

    /// The progress stream broke mid-flight.
    #[error("stream error: {0}")]
    Stream(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}
