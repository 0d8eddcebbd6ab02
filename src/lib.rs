//! # hostwarden
//!
//! Automated maintenance for a cluster node repository.
//!
//! hostwarden watches a fleet of physical hosts and tenant containers and
//! keeps the node repository honest about their health: nodes that stop
//! responding are failed, failed nodes are eventually recycled or parked, and
//! active nodes are only removed from their application through a
//! redeployment that leaves the application whole.
//!
//! ## Key properties
//!
//! - **Self-healing ticks**: every decision is re-derived from the repository
//!   at the start of each tick, so no in-memory inconsistency outlives one
//!   maintenance interval
//! - **Rate-limited failing**: a rolling-window throttle bounds how much of
//!   the fleet can be failed per day, so a bad release or a broken monitor
//!   cannot cascade into a zone-wide outage
//! - **Cascading host failure**: failing a host first fails its container
//!   children, each through its own application redeployment
//!
//! ## Architecture
//!
//! - **Node failer**: fuses liveness pings (ready nodes) with service-cluster
//!   status (active nodes) and drives nodes to failed
//! - **Failed expirer**: parks hardware-faulted nodes and recycles the rest
//!   back through the dirty pool
//! - **Maintenance scheduler**: steps each maintainer on its own cadence
//!   behind an operator-controlled job gate

pub mod clock;
pub mod config;
pub mod deploy;
pub mod liveness;
pub mod maintenance;
pub mod monitor;
pub mod node;
pub mod orchestrator;
pub mod repository;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

use crate::config::Zone;
use crate::maintenance::{ExpirerConfig, FailerConfig, ThrottlePolicy};

/// Configuration for a warden process
#[derive(Debug, Clone)]
pub struct Config {
    /// The zone this process maintains
    pub zone: Zone,
    /// Node failer configuration
    pub failer: FailerConfig,
    /// Failed-node expirer configuration
    pub expirer: ExpirerConfig,
    /// Rolling-window limit on node failing
    pub throttle: ThrottlePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zone: Zone::new(config::Environment::Dev),
            failer: FailerConfig::default(),
            expirer: ExpirerConfig::default(),
            throttle: ThrottlePolicy::hosted(),
        }
    }
}

/// Re-exports for convenience
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{Environment, Zone};
    pub use crate::maintenance::{
        ExpirerConfig, FailedExpirer, FailerConfig, JobControl, MaintenanceScheduler, Maintainer,
        NodeFailer, ThrottlePolicy,
    };
    pub use crate::node::{Node, NodeState, NodeType};
    pub use crate::repository::{InMemoryNodeRepository, NodeRepository};
    pub use crate::{Config, Error, Result};
}
