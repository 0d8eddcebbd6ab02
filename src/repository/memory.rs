//! In-memory node repository for development and testing
//!
//! Stores node records in memory and is suitable for development, testing,
//! and single-node deployments. Listing order is stable (sorted by hostname)
//! so maintenance decisions are deterministic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::node::{Agent, ApplicationId, Event, EventKind, Node, NodeState, NodeType};
use crate::repository::{NodeRepository, RepositoryLock};
use crate::{Error, Result};

/// In-memory node repository
pub struct InMemoryNodeRepository {
    /// Node records by hostname; BTreeMap keeps listing order stable
    nodes: RwLock<BTreeMap<String, Node>>,
    /// One advisory lock per application
    application_locks: DashMap<ApplicationId, Arc<Mutex<()>>>,
    /// Advisory lock over the unallocated pool
    unallocated_lock: Arc<Mutex<()>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryNodeRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            application_locks: DashMap::new(),
            unallocated_lock: Arc::new(Mutex::new(())),
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn update<F>(&self, hostname: &str, mutate: F) -> Result<Node>
    where
        F: FnOnce(&mut Node),
    {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(hostname)
            .ok_or_else(|| Error::NodeNotFound {
                hostname: hostname.to_string(),
            })?;
        mutate(node);
        Ok(node.clone())
    }
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn nodes(&self) -> Vec<Node> {
        self.nodes.read().values().cloned().collect()
    }

    async fn nodes_in(&self, state: NodeState) -> Vec<Node> {
        self.nodes
            .read()
            .values()
            .filter(|n| n.state == state)
            .cloned()
            .collect()
    }

    async fn nodes_of_type(&self, node_type: NodeType, state: NodeState) -> Vec<Node> {
        self.nodes
            .read()
            .values()
            .filter(|n| n.node_type == node_type && n.state == state)
            .cloned()
            .collect()
    }

    async fn nodes_of(&self, application: &ApplicationId, state: NodeState) -> Vec<Node> {
        self.nodes
            .read()
            .values()
            .filter(|n| {
                n.state == state
                    && n.allocation
                        .as_ref()
                        .is_some_and(|a| &a.owner == application)
            })
            .cloned()
            .collect()
    }

    async fn node(&self, hostname: &str) -> Option<Node> {
        self.nodes.read().get(hostname).cloned()
    }

    async fn node_in(&self, hostname: &str, state: NodeState) -> Option<Node> {
        self.nodes
            .read()
            .get(hostname)
            .filter(|n| n.state == state)
            .cloned()
    }

    async fn child_nodes(&self, parent_hostname: &str) -> Vec<Node> {
        self.nodes
            .read()
            .values()
            .filter(|n| n.parent_hostname.as_deref() == Some(parent_hostname))
            .cloned()
            .collect()
    }

    async fn write(&self, node: Node) -> Result<Node> {
        let mut nodes = self.nodes.write();
        nodes.insert(node.hostname.clone(), node.clone());
        Ok(node)
    }

    async fn fail(&self, hostname: &str, agent: Agent, reason: &str) -> Result<Node> {
        let now = self.now();
        self.update(hostname, |node| {
            if node.state == NodeState::Failed {
                // Already failed: replace the reason, leave the fail count
                node.history = node
                    .history
                    .clone()
                    .with(Event::with_detail(EventKind::Failed, agent, now, reason));
                return;
            }
            node.state = NodeState::Failed;
            node.status.fail_count += 1;
            node.history = node
                .history
                .clone()
                .with(Event::with_detail(EventKind::Failed, agent, now, reason));
        })
    }

    async fn park(&self, hostname: &str, agent: Agent, reason: &str) -> Result<Node> {
        let now = self.now();
        self.update(hostname, |node| {
            node.state = NodeState::Parked;
            node.history = node
                .history
                .clone()
                .with(Event::with_detail(EventKind::Parked, agent, now, reason));
        })
    }

    async fn set_dirty(&self, to_recycle: &[Node]) -> Result<Vec<Node>> {
        let now = self.now();
        let mut nodes = self.nodes.write();
        // All-or-nothing: verify every node exists before mutating any
        for node in to_recycle {
            if !nodes.contains_key(&node.hostname) {
                return Err(Error::NodeNotFound {
                    hostname: node.hostname.clone(),
                });
            }
        }
        let mut updated = Vec::with_capacity(to_recycle.len());
        for node in to_recycle {
            let record = nodes
                .get_mut(&node.hostname)
                .expect("existence verified above");
            record.state = NodeState::Dirty;
            record.status.hardware_failure = None;
            record.status.hardware_divergence = None;
            record.history =
                record
                    .history
                    .clone()
                    .with(Event::new(EventKind::Dirtied, Agent::System, now));
            updated.push(record.clone());
        }
        Ok(updated)
    }

    async fn reactivate(&self, hostname: &str, agent: Agent) -> Result<Node> {
        let now = self.now();
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(hostname)
            .ok_or_else(|| Error::NodeNotFound {
                hostname: hostname.to_string(),
            })?;
        if node.state != NodeState::Failed {
            return Err(Error::InvalidTransition {
                hostname: hostname.to_string(),
                from: node.state,
                to: NodeState::Active,
            });
        }
        if node.allocation.is_none() {
            return Err(Error::MissingAllocation {
                hostname: hostname.to_string(),
            });
        }
        node.state = NodeState::Active;
        node.history = node
            .history
            .clone()
            .with(Event::new(EventKind::Activated, agent, now));
        Ok(node.clone())
    }

    async fn remove_recursively(&self, hostname: &str) -> Result<()> {
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(hostname) {
            return Err(Error::NodeNotFound {
                hostname: hostname.to_string(),
            });
        }
        nodes.retain(|_, n| {
            n.hostname != hostname && n.parent_hostname.as_deref() != Some(hostname)
        });
        Ok(())
    }

    async fn lock_application(&self, application: &ApplicationId) -> RepositoryLock {
        let mutex = self
            .application_locks
            .entry(application.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    async fn lock_unallocated(&self) -> RepositoryLock {
        self.unallocated_lock.clone().lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::node::{Allocation, Flavor, NodeType};
    use std::time::Duration;

    fn repository() -> (Arc<ManualClock>, InMemoryNodeRepository) {
        let clock = Arc::new(ManualClock::new());
        let repository = InMemoryNodeRepository::new(clock.clone());
        (clock, repository)
    }

    fn ready_node(hostname: &str) -> Node {
        let mut node = Node::new(hostname, NodeType::Tenant, Flavor::bare_metal("d-2-8-50"));
        node.state = NodeState::Ready;
        node
    }

    #[tokio::test]
    async fn test_fail_increments_count_and_records_reason() {
        let (clock, repository) = repository();
        repository.write(ready_node("node-001")).await.unwrap();

        clock.advance(Duration::from_secs(30));
        let failed = repository
            .fail("node-001", Agent::System, "Node has hardware failure")
            .await
            .unwrap();

        assert_eq!(failed.state, NodeState::Failed);
        assert_eq!(failed.status.fail_count, 1);
        let event = failed.history.event(EventKind::Failed).unwrap();
        assert_eq!(event.at, clock.now());
        assert_eq!(event.detail.as_deref(), Some("Node has hardware failure"));
    }

    #[tokio::test]
    async fn test_fail_on_failed_node_replaces_reason_only() {
        let (_clock, repository) = repository();
        repository.write(ready_node("node-001")).await.unwrap();

        repository
            .fail("node-001", Agent::System, "first reason")
            .await
            .unwrap();
        let again = repository
            .fail("node-001", Agent::System, "second reason")
            .await
            .unwrap();

        assert_eq!(again.status.fail_count, 1);
        assert_eq!(
            again.history.event(EventKind::Failed).unwrap().detail.as_deref(),
            Some("second reason")
        );
    }

    #[tokio::test]
    async fn test_set_dirty_clears_hardware_annotations_but_not_fail_count() {
        let (_clock, repository) = repository();
        let mut node = ready_node("node-001");
        node.status.hardware_failure = Some("disk_smart".to_string());
        repository.write(node).await.unwrap();
        repository
            .fail("node-001", Agent::System, "Node has hardware failure")
            .await
            .unwrap();

        let failed = repository.node("node-001").await.unwrap();
        let recycled = repository.set_dirty(&[failed]).await.unwrap();

        assert_eq!(recycled[0].state, NodeState::Dirty);
        assert_eq!(recycled[0].status.hardware_failure, None);
        assert_eq!(recycled[0].status.fail_count, 1);
        assert!(recycled[0].history.has(EventKind::Dirtied));
    }

    #[tokio::test]
    async fn test_set_dirty_is_all_or_nothing() {
        let (_clock, repository) = repository();
        repository.write(ready_node("node-001")).await.unwrap();
        let present = repository.node("node-001").await.unwrap();
        let absent = ready_node("node-404");

        let result = repository.set_dirty(&[present, absent]).await;
        assert!(result.is_err());
        assert_eq!(
            repository.node("node-001").await.unwrap().state,
            NodeState::Ready
        );
    }

    #[tokio::test]
    async fn test_reactivate_requires_failed_state_and_allocation() {
        let (_clock, repository) = repository();
        repository.write(ready_node("node-001")).await.unwrap();

        // Not failed yet
        assert!(repository.reactivate("node-001", Agent::System).await.is_err());

        repository
            .fail("node-001", Agent::System, "down")
            .await
            .unwrap();
        // Failed, but never allocated
        assert!(repository.reactivate("node-001", Agent::System).await.is_err());

        let node = repository.node("node-001").await.unwrap().with_allocation(Allocation {
            owner: ApplicationId::new("app1"),
            index: 0,
        });
        repository.write(node).await.unwrap();
        let reactivated = repository.reactivate("node-001", Agent::System).await.unwrap();
        assert_eq!(reactivated.state, NodeState::Active);
    }

    #[tokio::test]
    async fn test_remove_recursively_takes_children_along() {
        let (_clock, repository) = repository();
        let mut host = Node::new("host-001", NodeType::Host, Flavor::bare_metal("d-16-64-500"));
        host.state = NodeState::Failed;
        repository.write(host).await.unwrap();
        let child = Node::new(
            "tenant-001",
            NodeType::Tenant,
            Flavor::docker_container("d-1-4-100"),
        )
        .with_parent("host-001");
        repository.write(child).await.unwrap();
        repository.write(ready_node("node-001")).await.unwrap();

        repository.remove_recursively("host-001").await.unwrap();

        assert!(repository.node("host-001").await.is_none());
        assert!(repository.node("tenant-001").await.is_none());
        assert!(repository.node("node-001").await.is_some());
    }

    #[tokio::test]
    async fn test_listing_order_is_stable() {
        let (_clock, repository) = repository();
        for name in ["node-003", "node-001", "node-002"] {
            repository.write(ready_node(name)).await.unwrap();
        }

        let names: Vec<String> = repository
            .nodes_in(NodeState::Ready)
            .await
            .into_iter()
            .map(|n| n.hostname)
            .collect();
        assert_eq!(names, vec!["node-001", "node-002", "node-003"]);
    }

    #[tokio::test]
    async fn test_application_lock_serializes_same_application_only() {
        let (_clock, repository) = repository();
        let app1 = ApplicationId::new("app1");
        let app2 = ApplicationId::new("app2");

        let guard = repository.lock_application(&app1).await;
        // A different application's lock is independently available
        let _other = repository.lock_application(&app2).await;
        drop(guard);
        let _again = repository.lock_application(&app1).await;
    }
}
