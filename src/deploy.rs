//! Redeployment interface
//!
//! Failing an active node is only safe if the application can immediately be
//! redeployed without it. The deployer hands out a deployment prepared from
//! the application's local active package; invoking `activate` commits it.
//! An empty result means another control-plane replica owns this deployment
//! and will act instead.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::node::{Agent, Allocation, ApplicationId, Event, EventKind, NodeState, NodeType};
use crate::repository::NodeRepository;
use crate::{Error, Result};

/// A prepared deployment that may be activated once.
#[async_trait]
pub trait Deployment: Send + Sync {
    /// Activate the deployment. Failure leaves the application unchanged.
    async fn activate(&self) -> Result<()>;
}

#[async_trait]
pub trait Deployer: Send + Sync {
    /// Prepare a deployment of the given application from its local active
    /// package, or `None` when this replica does not own the deployment.
    /// `timeout` bounds how long the returned handle stays activatable.
    async fn deploy_from_local_active(
        &self,
        application: &ApplicationId,
        timeout: Duration,
    ) -> Option<Box<dyn Deployment>>;
}

/// Shape of one application's node cluster, as known to the in-memory
/// deployer.
#[derive(Debug, Clone)]
pub struct ClusterSpec {
    pub node_type: NodeType,
    /// Fixed target size, or `None` for type-scoped clusters that always
    /// span every node of the type (infrastructure applications)
    pub count: Option<usize>,
}

impl ClusterSpec {
    /// A cluster with a fixed number of nodes; activation tops the
    /// application back up to this size from the ready pool.
    pub fn fixed(node_type: NodeType, count: usize) -> Self {
        Self {
            node_type,
            count: Some(count),
        }
    }

    /// A cluster spanning whatever nodes of the type are active; activation
    /// never provisions replacements.
    pub fn type_scoped(node_type: NodeType) -> Self {
        Self {
            node_type,
            count: None,
        }
    }
}

struct Inner {
    repository: Arc<dyn NodeRepository>,
    clock: Arc<dyn Clock>,
    clusters: DashMap<ApplicationId, ClusterSpec>,
    redeployments: AtomicU64,
    by_application: DashMap<ApplicationId, u64>,
}

/// In-memory deployer for development and testing.
///
/// Activation performs a minimal redeployment: fixed-size clusters are topped
/// back up to their target size from the ready pool, assigning each
/// replacement a fresh membership index. Activation fails when the ready
/// pool cannot cover the shortfall, leaving the application unchanged.
pub struct InMemoryDeployer {
    inner: Arc<Inner>,
}

impl InMemoryDeployer {
    pub fn new(repository: Arc<dyn NodeRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                clock,
                clusters: DashMap::new(),
                redeployments: AtomicU64::new(0),
                by_application: DashMap::new(),
            }),
        }
    }

    /// Make the deployer own deployments of the given application.
    pub fn register_cluster(&self, application: ApplicationId, spec: ClusterSpec) {
        self.inner.clusters.insert(application, spec);
    }

    /// Total successful activations so far.
    pub fn redeployments(&self) -> u64 {
        self.inner.redeployments.load(Ordering::Acquire)
    }

    /// Successful activations of the given application.
    pub fn redeployments_for(&self, application: &ApplicationId) -> u64 {
        self.inner
            .by_application
            .get(application)
            .map(|count| *count)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Deployer for InMemoryDeployer {
    async fn deploy_from_local_active(
        &self,
        application: &ApplicationId,
        _timeout: Duration,
    ) -> Option<Box<dyn Deployment>> {
        if !self.inner.clusters.contains_key(application) {
            debug!(application = %application, "Deployment not owned here");
            return None;
        }
        Some(Box::new(InMemoryDeployment {
            inner: self.inner.clone(),
            application: application.clone(),
        }))
    }
}

struct InMemoryDeployment {
    inner: Arc<Inner>,
    application: ApplicationId,
}

impl InMemoryDeployment {
    /// Highest membership index ever handed out for the application, across
    /// all node states, so replacement nodes never reuse an index.
    async fn next_index(&self) -> u32 {
        self.inner
            .repository
            .nodes()
            .await
            .iter()
            .filter_map(|n| n.allocation.as_ref())
            .filter(|a| a.owner == self.application)
            .map(|a| a.index + 1)
            .max()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Deployment for InMemoryDeployment {
    async fn activate(&self) -> Result<()> {
        let spec = self
            .inner
            .clusters
            .get(&self.application)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::ApplicationNotFound(self.application.clone()))?;

        if let Some(target) = spec.count {
            let active = self
                .inner
                .repository
                .nodes_of(&self.application, NodeState::Active)
                .await;
            let missing = target.saturating_sub(active.len());
            if missing > 0 {
                let ready = self
                    .inner
                    .repository
                    .nodes_of_type(spec.node_type, NodeState::Ready)
                    .await;
                if ready.len() < missing {
                    return Err(Error::OutOfCapacity {
                        application: self.application.clone(),
                        needed: missing,
                        available: ready.len(),
                    });
                }
                let now = self.inner.clock.now();
                let mut index = self.next_index().await;
                for node in ready.into_iter().take(missing) {
                    let hostname = node.hostname.clone();
                    let history = node
                        .history
                        .clone()
                        .with(Event::new(EventKind::Activated, Agent::Application, now));
                    let mut replacement = node
                        .with_allocation(Allocation {
                            owner: self.application.clone(),
                            index,
                        })
                        .with_history(history);
                    replacement.state = NodeState::Active;
                    self.inner.repository.write(replacement).await?;
                    info!(
                        application = %self.application,
                        hostname = %hostname,
                        index,
                        "Activated replacement node"
                    );
                    index += 1;
                }
            }
        }

        self.inner.redeployments.fetch_add(1, Ordering::AcqRel);
        *self
            .inner
            .by_application
            .entry(self.application.clone())
            .or_insert(0) += 1;
        Ok(())
    }
}
