//! Node repository interface
//!
//! The repository is the single source of truth for node records. This trait
//! abstracts the storage backend so the maintenance loops can run against an
//! in-memory store in development and tests, and against a real coordination
//! service in production.

mod memory;

pub use memory::InMemoryNodeRepository;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::node::{Agent, ApplicationId, Node, NodeState, NodeType};
use crate::Result;

/// Advisory lock guard handed out by the repository.
///
/// Scoped to one application (or to the unallocated pool); dropped to release.
pub type RepositoryLock = OwnedMutexGuard<()>;

/// Persistent store of node records with transactional per-application locks.
///
/// Read-modify-write sequences on node records must re-read inside the
/// relevant lock; the locks are advisory and do not gate the individual
/// operations below.
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// All nodes, in stable hostname order.
    async fn nodes(&self) -> Vec<Node>;

    /// All nodes in the given state.
    async fn nodes_in(&self, state: NodeState) -> Vec<Node>;

    /// All nodes of the given type in the given state.
    async fn nodes_of_type(&self, node_type: NodeType, state: NodeState) -> Vec<Node>;

    /// All nodes allocated to the given application in the given state.
    async fn nodes_of(&self, application: &ApplicationId, state: NodeState) -> Vec<Node>;

    /// The node with the given hostname, in any state.
    async fn node(&self, hostname: &str) -> Option<Node>;

    /// The node with the given hostname, only if in the given state.
    async fn node_in(&self, hostname: &str, state: NodeState) -> Option<Node>;

    /// Child containers of the given parent host, in any state.
    async fn child_nodes(&self, parent_hostname: &str) -> Vec<Node>;

    /// Writes the given node record, replacing any record with the same
    /// hostname.
    async fn write(&self, node: Node) -> Result<Node>;

    /// Moves a node to failed, recording the reason and incrementing its
    /// fail count. Failing an already-failed node only replaces the reason.
    async fn fail(&self, hostname: &str, agent: Agent, reason: &str) -> Result<Node>;

    /// Moves a node to parked, withdrawing it from automated reuse.
    async fn park(&self, hostname: &str, agent: Agent, reason: &str) -> Result<Node>;

    /// Moves the given nodes to dirty in one call, clearing their hardware
    /// annotations. Fail counts are preserved.
    async fn set_dirty(&self, nodes: &[Node]) -> Result<Vec<Node>>;

    /// Rolls a failed node back to active. The node must retain its
    /// allocation.
    async fn reactivate(&self, hostname: &str, agent: Agent) -> Result<Node>;

    /// Removes a node and all of its children from the repository.
    async fn remove_recursively(&self, hostname: &str) -> Result<()>;

    /// Acquires the lock serializing writes to nodes allocated to the given
    /// application.
    async fn lock_application(&self, application: &ApplicationId) -> RepositoryLock;

    /// Acquires the lock serializing writes to unallocated nodes.
    async fn lock_unallocated(&self) -> RepositoryLock;
}
