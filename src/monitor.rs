//! Service monitoring
//!
//! The service monitor reports per-service-instance status for every deployed
//! application, grouped by application and service cluster. It is the
//! higher-fidelity health signal for active nodes; ready nodes are covered by
//! the liveness tracker instead.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::node::{ApplicationId, NodeState};
use crate::repository::NodeRepository;

/// Observed status of one service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Up,
    Down,
    /// No positive information; callers must take no action
    Unknown,
}

/// One service process on one host.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub hostname: String,
    pub status: ServiceStatus,
}

/// A cluster of service instances within an application.
#[derive(Debug, Clone)]
pub struct ServiceCluster {
    pub id: String,
    pub services: Vec<ServiceInstance>,
}

/// The monitor's view of one deployed application.
#[derive(Debug, Clone)]
pub struct ApplicationInstance {
    pub application: ApplicationId,
    pub clusters: Vec<ServiceCluster>,
}

/// Source of service status, consumed by the node failer.
#[async_trait]
pub trait ServiceMonitor: Send + Sync {
    /// Status for every application instance the monitor knows about.
    /// Report order is stable between calls on an unchanged world.
    async fn application_instances(&self) -> Vec<ApplicationInstance>;

    /// Whether the monitor currently has positive status information at all.
    /// When false, every per-service status it reports is `Unknown`.
    fn status_is_known(&self) -> bool;
}

/// In-memory service monitor deriving the application view from the node
/// repository.
///
/// Suitable for development, testing, and single-node deployments: active
/// allocated nodes are reported up unless explicitly marked down, and the
/// whole monitor can be switched to "status unknown" to model an outage of
/// the monitoring plane.
pub struct InMemoryServiceMonitor {
    repository: Arc<dyn NodeRepository>,
    down_hosts: RwLock<HashSet<String>>,
    status_known: AtomicBool,
}

impl InMemoryServiceMonitor {
    pub fn new(repository: Arc<dyn NodeRepository>) -> Self {
        Self {
            repository,
            down_hosts: RwLock::new(HashSet::new()),
            status_known: AtomicBool::new(true),
        }
    }

    /// Mark a host's services as positively down.
    pub fn set_host_down(&self, hostname: &str) {
        self.down_hosts.write().insert(hostname.to_string());
    }

    /// Mark a host's services as positively up.
    pub fn set_host_up(&self, hostname: &str) {
        self.down_hosts.write().remove(hostname);
    }

    pub fn set_status_known(&self, known: bool) {
        self.status_known.store(known, Ordering::Release);
    }
}

#[async_trait]
impl ServiceMonitor for InMemoryServiceMonitor {
    async fn application_instances(&self) -> Vec<ApplicationInstance> {
        let known = self.status_is_known();
        let down = self.down_hosts.read().clone();

        let mut by_application: BTreeMap<ApplicationId, Vec<ServiceInstance>> = BTreeMap::new();
        for node in self.repository.nodes_in(NodeState::Active).await {
            let Some(allocation) = &node.allocation else {
                continue;
            };
            let status = if !known {
                ServiceStatus::Unknown
            } else if down.contains(&node.hostname) {
                ServiceStatus::Down
            } else {
                ServiceStatus::Up
            };
            by_application
                .entry(allocation.owner.clone())
                .or_default()
                .push(ServiceInstance {
                    hostname: node.hostname,
                    status,
                });
        }

        by_application
            .into_iter()
            .map(|(application, services)| ApplicationInstance {
                application,
                clusters: vec![ServiceCluster {
                    id: "default".to_string(),
                    services,
                }],
            })
            .collect()
    }

    fn status_is_known(&self) -> bool {
        self.status_known.load(Ordering::Acquire)
    }
}
