//! The node entity and its value types
//!
//! A `Node` is the unit of the repository: one physical host, virtual
//! machine, or container, identified by hostname. Nodes move through a fixed
//! state lifecycle and carry an event history plus status annotations that
//! the maintenance loops read and write.

pub mod history;

pub use history::{Event, EventKind, History};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the application owning an allocated node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(String);

impl ApplicationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Provisioned,
    Ready,
    Reserved,
    Active,
    Inactive,
    Dirty,
    Failed,
    Parked,
}

/// What role a node plays in the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Runs tenant application workloads
    Tenant,
    /// A physical host carrying container children
    Host,
    /// Routes traffic into the zone
    Proxy,
    /// Runs the config service
    Config,
}

/// Sub-kind of a flavor, distinguishing containerized leaves from machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlavorKind {
    BareMetal,
    VirtualMachine,
    DockerContainer,
}

/// A node's hardware flavor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    pub name: String,
    pub kind: FlavorKind,
}

impl Flavor {
    pub fn new(name: impl Into<String>, kind: FlavorKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn bare_metal(name: impl Into<String>) -> Self {
        Self::new(name, FlavorKind::BareMetal)
    }

    pub fn docker_container(name: impl Into<String>) -> Self {
        Self::new(name, FlavorKind::DockerContainer)
    }
}

/// Who performed a repository operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    System,
    Operator,
    Application,
}

/// The binding between a node and the application it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub owner: ApplicationId,
    /// Membership index within the owning cluster. Never reused for a
    /// replacement node.
    pub index: u32,
}

/// Status annotations carried by a node across state transitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Number of times the node has been moved to failed. Monotonically
    /// non-decreasing; recycling through dirty does not reset it.
    pub fail_count: u32,
    /// Set by the node's local probe when a hardware error has been
    /// positively detected
    pub hardware_failure: Option<String>,
    /// Set when the node's observed hardware diverges from its declared spec
    pub hardware_divergence: Option<String>,
}

/// A node in the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub hostname: String,
    pub node_type: NodeType,
    pub flavor: Flavor,
    pub state: NodeState,
    /// Present iff the node is assigned to an application
    pub allocation: Option<Allocation>,
    pub status: NodeStatus,
    pub history: History,
    /// Set iff the node is a child container on a host
    pub parent_hostname: Option<String>,
}

impl Node {
    pub fn new(hostname: impl Into<String>, node_type: NodeType, flavor: Flavor) -> Self {
        Self {
            hostname: hostname.into(),
            node_type,
            flavor,
            state: NodeState::Provisioned,
            allocation: None,
            status: NodeStatus::default(),
            history: History::new(),
            parent_hostname: None,
        }
    }

    pub fn is_docker_container(&self) -> bool {
        self.flavor.kind == FlavorKind::DockerContainer
    }

    /// Returns this node recorded as positively down at the given instant.
    pub fn down_at(self, at: DateTime<Utc>, agent: Agent) -> Self {
        let history = self.history.clone().with(Event::new(EventKind::Down, agent, at));
        Self { history, ..self }
    }

    /// Returns this node with any down record cleared.
    pub fn up(self) -> Self {
        let history = self.history.clone().without(EventKind::Down);
        Self { history, ..self }
    }

    pub fn with_history(self, history: History) -> Self {
        Self { history, ..self }
    }

    pub fn with_status(self, status: NodeStatus) -> Self {
        Self { status, ..self }
    }

    pub fn with_allocation(self, allocation: Allocation) -> Self {
        Self {
            allocation: Some(allocation),
            ..self
        }
    }

    pub fn with_parent(self, parent_hostname: impl Into<String>) -> Self {
        Self {
            parent_hostname: Some(parent_hostname.into()),
            ..self
        }
    }
}
