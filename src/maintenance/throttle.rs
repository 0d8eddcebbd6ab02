//! Rolling-window throttle on node failing
//!
//! The throttle is the last line of defense against a bad release or a broken
//! monitor cascading into a fleet-wide outage: it bounds how many nodes may
//! be moved to failed within a rolling window. The engine is stateless; it
//! re-derives the recently-failed count from repository history at every
//! decision point, so the throttle survives process restarts.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use crate::clock::delta;
use crate::node::{EventKind, Node};

/// Limits on the rate of node failing.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottlePolicy {
    /// Length of the rolling window
    pub window: Duration,
    /// Fraction of the (non-container) population allowed to fail per window
    pub fraction_allowed_to_fail: f64,
    /// Floor on the budget, so small zones can still make progress
    pub minimum_allowed_to_fail: usize,
}

impl ThrottlePolicy {
    /// Production policy: at most 1% of the zone, but always at least 2
    /// nodes, per day.
    pub fn hosted() -> Self {
        Self {
            window: Duration::from_secs(24 * 60 * 60),
            fraction_allowed_to_fail: 0.01,
            minimum_allowed_to_fail: 2,
        }
    }

    /// Never throttle.
    pub fn disabled() -> Self {
        Self {
            window: Duration::ZERO,
            fraction_allowed_to_fail: 0.0,
            minimum_allowed_to_fail: 0,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self == &Self::disabled()
    }

    /// Whether failing one more node right now would exceed the budget.
    ///
    /// Docker containers neither consume the budget nor count toward the
    /// population it is computed from: container failures are absorbed by
    /// their host's capacity and carry no replacement cost.
    pub fn is_throttled(&self, nodes: &[Node], now: DateTime<Utc>) -> bool {
        if self.is_disabled() {
            return false;
        }
        let window_start = now - delta(self.window);
        let population: Vec<&Node> = nodes.iter().filter(|n| !n.is_docker_container()).collect();
        let recently_failed = population
            .iter()
            .filter(|n| {
                n.history
                    .event(EventKind::Failed)
                    .is_some_and(|e| e.at > window_start)
            })
            .count();
        let budget = ((population.len() as f64 * self.fraction_allowed_to_fail).floor() as usize)
            .max(self.minimum_allowed_to_fail);
        recently_failed >= budget
    }
}

impl fmt::Display for ThrottlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max {:.0}% or {} nodes may fail over a period of {:?}",
            self.fraction_allowed_to_fail * 100.0,
            self.minimum_allowed_to_fail,
            self.window
        )
    }
}
