//! Delivery coordinator library for ReportRun.
//!
//! Guarantees a caller observes a task run's terminal outcome exactly
//! once: a live progress stream is the primary channel, with automatic
//! recovery through three fallback tiers (reconnect with backoff,
//! server-side resolve, client-side periodic polling).

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod sse;

pub use channel::{EventStream, ProgressChannel, ResolveOutcome, SubmitResponse};
pub use config::DeliveryConfig;
pub use coordinator::{
    DeliveryCommand, DeliveryHandle, DeliveryOutcome, DeliverySession, DeliveryState,
    DeliveryUpdate,
};
pub use error::ClientError;
pub use http::HttpChannel;
