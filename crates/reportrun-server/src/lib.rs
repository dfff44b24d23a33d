//! ReportRun Delivery Server Library
//!
//! This crate provides the server half of the task delivery subsystem:
//! the admission controller, the task registry with live progress
//! channels, the server-side resolve path, and the idempotent
//! finalizer.

pub mod admission;
pub mod config;
pub mod http;
pub mod metrics;
pub mod pipeline;
pub mod state;

pub use admission::{Admission, AdmissionController, LimiterKey, LimiterSpec};
pub use config::ServerConfig;
pub use pipeline::{ProgressSink, ResearchPipeline, StubPipeline};
pub use state::AppState;
