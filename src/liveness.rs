//! Host liveness tracking
//!
//! Ready nodes prove they are alive by making config requests. The liveness
//! tracker remembers the instant of the last request seen from each host; the
//! node failer folds that into the repository lazily, once per tick, to avoid
//! a repository write per heartbeat.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::clock::Clock;

/// Read side of liveness tracking, consumed by the node failer.
pub trait HostLivenessTracker: Send + Sync {
    /// The instant of the last request observed from the given host, if any.
    /// Non-decreasing per host.
    fn last_request_from(&self, hostname: &str) -> Option<DateTime<Utc>>;
}

/// In-memory liveness tracker fed by the config request handler.
pub struct InMemoryLivenessTracker {
    requests: DashMap<String, DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLivenessTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            requests: DashMap::new(),
            clock,
        }
    }

    /// Record a config request from the given host at the current instant.
    pub fn record_request(&self, hostname: &str) {
        let now = self.clock.now();
        self.requests
            .entry(hostname.to_string())
            .and_modify(|at| {
                if *at < now {
                    *at = now;
                }
            })
            .or_insert(now);
    }
}

impl HostLivenessTracker for InMemoryLivenessTracker {
    fn last_request_from(&self, hostname: &str) -> Option<DateTime<Utc>> {
        self.requests.get(hostname).map(|at| *at)
    }
}
