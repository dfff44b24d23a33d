//! Admission controller - rate-limit gate for new task runs.
//!
//! A request is evaluated against an ordered list of limiter scopes;
//! every scope must pass (they are ANDed) and the first scope at
//! capacity denies the request without evaluating the rest. Denied
//! requests are never queued.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// How the limiter key is computed for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterKey {
    /// One window per caller (keyed by the caller's network address).
    PerClient,
    /// A single window shared by all callers.
    Global,
}

/// Declarative configuration for one limiter scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSpec {
    /// Scope name, used as part of the record key.
    pub name: String,

    /// Maximum number of admissions inside the window.
    pub requests: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Key computation for this scope.
    pub key: LimiterKey,
}

impl LimiterSpec {
    /// Create a new limiter spec.
    pub fn new(name: impl Into<String>, requests: u32, window_ms: u64, key: LimiterKey) -> Self {
        Self {
            name: name.into(),
            requests,
            window_ms,
            key,
        }
    }

    fn key_for<'a>(&self, client_key: &'a str) -> &'a str {
        match self.key {
            LimiterKey::PerClient => client_key,
            LimiterKey::Global => "global",
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed; one entry was recorded per scope.
    Allow,
    /// The request is rejected; retry after the given delay.
    Deny { retry_after_ms: u64 },
}

impl Admission {
    /// Retry-after in whole seconds (ceiling), if denied.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Allow => None,
            Self::Deny { retry_after_ms } => Some(retry_after_ms.div_ceil(1000)),
        }
    }
}

/// Multi-scope sliding-window admission controller.
///
/// Records are epoch-millis timestamps keyed by `(scope, key)`; stale
/// entries are pruned on read. Check and record happen under a single
/// write-lock acquisition, so concurrent admissions never exceed a
/// limit.
pub struct AdmissionController {
    specs: Vec<LimiterSpec>,
    records: RwLock<HashMap<(String, String), Vec<i64>>>,
}

impl AdmissionController {
    /// Create a controller from an ordered list of limiter specs.
    pub fn new(specs: Vec<LimiterSpec>) -> Self {
        Self {
            specs,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate a request from the given caller.
    pub async fn admit(&self, client_key: &str) -> Admission {
        self.admit_at(client_key, Utc::now().timestamp_millis()).await
    }

    /// Evaluate a request at an explicit clock reading.
    pub async fn admit_at(&self, client_key: &str, now_ms: i64) -> Admission {
        let mut records = self.records.write().await;

        for spec in &self.specs {
            let key = (spec.name.clone(), spec.key_for(client_key).to_string());
            let cutoff = now_ms - spec.window_ms as i64;

            let entries = records.entry(key).or_default();
            entries.retain(|&stamp| stamp >= cutoff);

            if entries.len() >= spec.requests as usize {
                // Entries are appended in time order, so the front is
                // the oldest counted admission.
                let oldest = entries[0];
                let retry_after_ms = (spec.window_ms as i64 - (now_ms - oldest)).max(0) as u64;
                debug!(
                    scope = %spec.name,
                    count = entries.len(),
                    retry_after_ms,
                    "Admission denied"
                );
                return Admission::Deny { retry_after_ms };
            }
        }

        for spec in &self.specs {
            let key = (spec.name.clone(), spec.key_for(client_key).to_string());
            records.entry(key).or_default().push(now_ms);
        }

        Admission::Allow
    }
}
