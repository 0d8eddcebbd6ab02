//! Recycling of expired failed nodes
//!
//! Failed nodes are kept around for a while so an operator can move them
//! back and recover data when a node was failed accidentally. Once the grace
//! interval has passed this maintainer decides their fate: nodes with a
//! positively detected hardware failure or divergence are parked (hosts only
//! once every child is parked); nodes whose failure signature does not
//! indicate a hardware fault are returned to the dirty pool for cleaning.
//! Everything else stays in failed.
//!
//! Recycling plus the fail count is what catches undetected hardware faults:
//! a bad node keeps coming back, keeps failing, and once it has failed often
//! enough it is no longer recycled.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{delta, Clock};
use crate::config::{Environment, Zone};
use crate::maintenance::Maintainer;
use crate::node::{Agent, EventKind, Node, NodeState, NodeType};
use crate::repository::NodeRepository;
use crate::Result;

/// Failing this often is taken as evidence of a hardware fault.
const HARDWARE_FAULT_FAIL_COUNT: u32 = 5;

/// Tunables of the failed-node expirer.
#[derive(Debug, Clone)]
pub struct ExpirerConfig {
    /// Minimum age in failed before a node is recycled
    pub fail_timeout: Duration,
    /// How often the expirer runs
    pub interval: Duration,
}

impl Default for ExpirerConfig {
    fn default() -> Self {
        Self {
            fail_timeout: Duration::from_secs(24 * 60 * 60),
            interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Moves expired failed nodes to parked or dirty.
pub struct FailedExpirer {
    repository: Arc<dyn NodeRepository>,
    clock: Arc<dyn Clock>,
    zone: Zone,
    config: ExpirerConfig,
}

impl FailedExpirer {
    pub fn new(
        repository: Arc<dyn NodeRepository>,
        clock: Arc<dyn Clock>,
        zone: Zone,
        config: ExpirerConfig,
    ) -> Self {
        Self {
            repository,
            clock,
            zone,
            config,
        }
    }

    pub async fn maintain(&self) -> Result<()> {
        let expired = self.expired_failed_nodes().await;
        self.expire(expired).await
    }

    /// Nodes in failed whose failed event is older than the fail timeout.
    async fn expired_failed_nodes(&self) -> Vec<Node> {
        let expiry = self.clock.now() - delta(self.config.fail_timeout);
        self.repository
            .nodes_in(NodeState::Failed)
            .await
            .into_iter()
            .filter(|node| {
                node.history
                    .event(EventKind::Failed)
                    .is_some_and(|event| event.at < expiry)
            })
            .collect()
    }

    async fn expire(&self, expired: Vec<Node>) -> Result<()> {
        let mut nodes_to_recycle = Vec::new();
        for candidate in expired {
            if candidate.status.hardware_failure.is_some()
                || candidate.status.hardware_divergence.is_some()
            {
                let non_parked_children = self.non_parked_children(&candidate).await;
                if non_parked_children.is_empty() {
                    if let Err(e) = self
                        .repository
                        .park(
                            &candidate.hostname,
                            Agent::System,
                            "Hardware failure or divergence detected on node",
                        )
                        .await
                    {
                        warn!(hostname = %candidate.hostname, error = %e, "Failed to park node");
                    }
                } else {
                    info!(
                        hostname = %candidate.hostname,
                        children = ?non_parked_children,
                        "Not parking failed node with hardware issues until all children are parked"
                    );
                }
            } else if candidate.status.fail_count < HARDWARE_FAULT_FAIL_COUNT
                || !self.fail_count_indicates_hardware_fault(&candidate)
            {
                nodes_to_recycle.push(candidate);
            } else {
                debug!(
                    hostname = %candidate.hostname,
                    fail_count = candidate.status.fail_count,
                    "Retaining failed node, repeated failures indicate a hardware fault"
                );
            }
        }
        if !nodes_to_recycle.is_empty() {
            self.repository.set_dirty(&nodes_to_recycle).await?;
        }
        Ok(())
    }

    async fn non_parked_children(&self, node: &Node) -> Vec<String> {
        if node.node_type != NodeType::Host {
            return Vec::new();
        }
        self.repository
            .child_nodes(&node.hostname)
            .await
            .into_iter()
            .filter(|child| child.state != NodeState::Parked)
            .map(|child| child.hostname)
            .collect()
    }

    /// A high fail count only implicates the hardware where applications
    /// cannot be the cause: production and staging run vetted workloads, and
    /// container failures land on the host, not the container.
    fn fail_count_indicates_hardware_fault(&self, node: &Node) -> bool {
        if node.is_docker_container() {
            return false;
        }
        matches!(
            self.zone.environment,
            Environment::Production | Environment::Staging
        )
    }
}

#[async_trait::async_trait]
impl Maintainer for FailedExpirer {
    fn name(&self) -> &'static str {
        "failed-expirer"
    }

    fn interval(&self) -> Duration {
        self.config.interval
    }

    async fn step(&self) -> Result<()> {
        self.maintain().await
    }
}
