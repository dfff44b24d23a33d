//! Server configuration.

use std::time::Duration;

use crate::admission::{LimiterKey, LimiterSpec};

/// Server configuration.
pub struct ServerConfig {
    /// HTTP bind address.
    pub bind_addr: String,

    /// How long a resolve call may block before giving up (seconds).
    pub resolve_timeout_secs: u64,

    /// Registry poll interval inside a resolve call (milliseconds).
    pub resolve_poll_interval_ms: u64,

    /// Per-task broadcast channel capacity.
    pub stream_channel_capacity: usize,

    /// Ordered admission limiter scopes.
    pub limiters: Vec<LimiterSpec>,
}

impl ServerConfig {
    /// Resolve timeout as a [`Duration`].
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    /// Resolve poll interval as a [`Duration`].
    pub fn resolve_poll_interval(&self) -> Duration {
        Duration::from_millis(self.resolve_poll_interval_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            resolve_timeout_secs: 120,
            resolve_poll_interval_ms: 250,
            stream_channel_capacity: 256,
            limiters: default_limiters(),
        }
    }
}

/// Default admission policy: one per-caller scope plus two global
/// scopes, evaluated in this order.
pub fn default_limiters() -> Vec<LimiterSpec> {
    vec![
        LimiterSpec::new("per-client-hourly", 10, 3_600_000, LimiterKey::PerClient),
        LimiterSpec::new("global-per-minute", 6, 60_000, LimiterKey::Global),
        LimiterSpec::new("global-daily", 100, 86_400_000, LimiterKey::Global),
    ]
}
