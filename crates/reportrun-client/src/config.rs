//! Delivery session configuration.

use std::time::Duration;

/// Tunable policy parameters for a delivery session.
///
/// The fast-fail pair discriminates non-transient stream failures
/// (e.g. permission loss) from network blips: repeated failures with no
/// genuine event inside the window skip the remaining reconnect budget
/// and drop straight to periodic polling.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Reconnect attempts before escalating to server-side resolve.
    pub max_reconnect_attempts: u32,

    /// Ceiling for the exponential reconnect backoff.
    pub backoff_cap: Duration,

    /// Failure count that arms the fast-fail heuristic.
    pub fast_fail_attempts: u32,

    /// How recent the last genuine event must be for fast-fail.
    pub fast_fail_window: Duration,

    /// Interval between polls in the periodic-polling tier.
    pub poll_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            backoff_cap: Duration::from_secs(30),
            fast_fail_attempts: 3,
            fast_fail_window: Duration::from_secs(5),
            poll_interval: Duration::from_secs(30),
        }
    }
}
