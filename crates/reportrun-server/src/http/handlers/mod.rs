//! HTTP request handlers.

mod delivery;
mod health;
mod stream;
mod tasks;

pub use delivery::{finalize_task, resolve_task, task_status};
pub use health::{health_check, metrics_handler};
pub use stream::stream_events;
pub use tasks::create_task;
