//! Automatic failing of dead and down nodes
//!
//! The failer fuses two independent health signals. Ready nodes prove
//! liveness by making config requests, tracked by the liveness tracker;
//! active nodes are covered by the service monitor's per-service status.
//! Nodes that stay dead or down past their grace window are moved to failed,
//! subject to the orchestrator's suspension verdict, per-type failing
//! policies, and the rolling-window throttle. Failing an active node goes
//! through the cascaded fail-active protocol: the application is redeployed
//! without the node, or nothing changes at all.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::cmp;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::clock::{delta, Clock};
use crate::deploy::Deployer;
use crate::liveness::HostLivenessTracker;
use crate::maintenance::{Maintainer, ThrottlePolicy};
use crate::monitor::{ServiceMonitor, ServiceStatus};
use crate::node::{Agent, Event, EventKind, Node, NodeState, NodeType};
use crate::orchestrator::{ApplicationStatus, Orchestrator};
use crate::repository::NodeRepository;
use crate::{Error, Result};

/// How long a prepared deployment stays activatable.
const DEPLOY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Tunables of the node failer.
#[derive(Debug, Clone)]
pub struct FailerConfig {
    /// Grace between the first positive DOWN observation and destructive
    /// failing
    pub down_time_limit: Duration,
    /// Expected config request cadence of ready nodes
    pub node_request_interval: Duration,
}

impl Default for FailerConfig {
    fn default() -> Self {
        Self {
            down_time_limit: Duration::from_secs(60 * 60),
            node_request_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Maintains liveness information on node records and fails nodes which have
/// not responded within the configured time limits.
pub struct NodeFailer {
    repository: Arc<dyn NodeRepository>,
    /// Provides information about the status of ready nodes
    liveness: Arc<dyn HostLivenessTracker>,
    /// Provides (more accurate) information about the status of active nodes
    monitor: Arc<dyn ServiceMonitor>,
    orchestrator: Arc<dyn Orchestrator>,
    deployer: Arc<dyn Deployer>,
    clock: Arc<dyn Clock>,
    config: FailerConfig,
    throttle_policy: ThrottlePolicy,
    interval: Duration,
    /// When this failer instance was created. Re-instantiating resets the
    /// grace window for dead-ready detection, which is what a restart wants:
    /// heartbeats need time to re-accumulate before they can be trusted.
    construction_time: DateTime<Utc>,
}

impl NodeFailer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn NodeRepository>,
        liveness: Arc<dyn HostLivenessTracker>,
        monitor: Arc<dyn ServiceMonitor>,
        orchestrator: Arc<dyn Orchestrator>,
        deployer: Arc<dyn Deployer>,
        clock: Arc<dyn Clock>,
        config: FailerConfig,
        throttle_policy: ThrottlePolicy,
    ) -> Self {
        // Check status every five minutes, but at least twice as often as the
        // down time limit
        let interval = cmp::min(config.down_time_limit / 2, Duration::from_secs(5 * 60));
        let construction_time = clock.now();
        Self {
            repository,
            liveness,
            monitor,
            orchestrator,
            deployer,
            clock,
            config,
            throttle_policy,
            interval,
            construction_time,
        }
    }

    /// One full decision pass over the fleet.
    pub async fn maintain(&self) -> Result<()> {
        // Ready nodes
        self.update_node_liveness_events().await;
        for node in self.ready_nodes_which_are_dead().await {
            // Hosts and containers do not make config requests themselves
            if node.is_docker_container() || node.node_type == NodeType::Host {
                continue;
            }
            if !self.throttled(&node).await {
                self.fail(&node, "Not receiving config requests from node")
                    .await;
            }
        }

        for node in self.ready_nodes_with_hardware_failure().await {
            if !self.throttled(&node).await {
                self.fail(&node, "Node has hardware failure").await;
            }
        }

        for node in self.ready_nodes_with_hardware_divergence().await {
            if !self.throttled(&node).await {
                self.fail(&node, "Node hardware diverges from spec").await;
            }
        }

        // Active nodes
        let now = self.clock.now();
        for node in self.determine_active_node_down_status().await {
            let Some(down) = node.history.event(EventKind::Down) else {
                continue;
            };
            let grace_time_end = down.at + delta(self.config.down_time_limit);
            if grace_time_end >= now {
                continue;
            }
            if self.application_suspended(&node).await {
                continue;
            }
            if !self.fail_allowed_for(node.node_type).await {
                continue;
            }
            if !self.throttled(&node).await {
                let reason = format!(
                    "Node has been down longer than {:?}",
                    self.config.down_time_limit
                );
                self.fail_active(&node, &reason).await;
            }
        }

        Ok(())
    }

    /// Fold the liveness tracker's last-request instants into the `requested`
    /// events of ready nodes. Done lazily here, under the unallocated lock,
    /// to avoid a repository write per config request.
    async fn update_node_liveness_events(&self) {
        let _lock = self.repository.lock_unallocated().await;
        for node in self.repository.nodes_in(NodeState::Ready).await {
            let Some(last_request) = self.liveness.last_request_from(&node.hostname) else {
                continue;
            };
            let recorded = node.history.event(EventKind::Requested);
            if recorded.is_none_or(|event| event.at < last_request) {
                let history = node.history.clone().with(Event::new(
                    EventKind::Requested,
                    Agent::System,
                    last_request,
                ));
                if let Err(e) = self.repository.write(node.with_history(history)).await {
                    warn!(error = %e, "Failed to record liveness event");
                }
            }
        }
    }

    /// Ready nodes that have gone silent for longer than the down time limit
    /// plus one request interval.
    async fn ready_nodes_which_are_dead(&self) -> Vec<Node> {
        let now = self.clock.now();
        // Allow requests some time to be registered in case all config
        // servers have been down
        if self.construction_time > now - delta(self.config.node_request_interval * 2) {
            return Vec::new();
        }

        // Nodes are taken as dead if they have not made a config request
        // since this instant. One request interval of slack allows nodes to
        // request that infrequently.
        let oldest_acceptable_request =
            now - delta(self.config.down_time_limit) - delta(self.config.node_request_interval);

        self.repository
            .nodes_in(NodeState::Ready)
            .await
            .into_iter()
            .filter(|node| was_made_ready_before(node, oldest_acceptable_request))
            .filter(|node| !has_recorded_request_after(node, oldest_acceptable_request))
            .collect()
    }

    async fn ready_nodes_with_hardware_failure(&self) -> Vec<Node> {
        self.repository
            .nodes_in(NodeState::Ready)
            .await
            .into_iter()
            .filter(|node| node.status.hardware_failure.is_some())
            .collect()
    }

    async fn ready_nodes_with_hardware_divergence(&self) -> Vec<Node> {
        self.repository
            .nodes_in(NodeState::Ready)
            .await
            .into_iter()
            .filter(|node| node.status.hardware_divergence.is_some())
            .collect()
    }

    /// Update down/up records on active nodes from the service monitor.
    ///
    /// A node positively DOWN gets a down event if it has none; a node
    /// positively UP gets its down event cleared. Unknown status means no
    /// action, so a monitor outage preserves accumulated grace-window
    /// progress. Returns all nodes currently reported positively down.
    async fn determine_active_node_down_status(&self) -> Vec<Node> {
        let mut down_nodes = Vec::new();
        for application in self.monitor.application_instances().await {
            for cluster in &application.clusters {
                for service in &cluster.services {
                    let Some(node) = self
                        .repository
                        .node_in(&service.hostname, NodeState::Active)
                        .await
                    else {
                        // The monitor also reports services on nodes outside
                        // this repository
                        continue;
                    };
                    match service.status {
                        ServiceStatus::Down => down_nodes.push(self.record_as_down(node).await),
                        ServiceStatus::Up => self.clear_down_record(node).await,
                        ServiceStatus::Unknown => {}
                    }
                }
            }
        }
        down_nodes
    }

    /// Record the node as down if not already recorded. The original down
    /// timestamp is never moved; it anchors the grace window.
    async fn record_as_down(&self, node: Node) -> Node {
        if node.history.has(EventKind::Down) {
            return node;
        }
        let Some(allocation) = node.allocation.clone() else {
            error!(
                hostname = %node.hostname,
                "Active node has no allocation, skipping down bookkeeping"
            );
            return node;
        };

        let _lock = self.repository.lock_application(&allocation.owner).await;
        // Re-read inside the lock
        let Some(fresh) = self
            .repository
            .node_in(&node.hostname, NodeState::Active)
            .await
        else {
            return node;
        };
        let updated = fresh.down_at(self.clock.now(), Agent::System);
        match self.repository.write(updated).await {
            Ok(written) => written,
            Err(e) => {
                warn!(hostname = %node.hostname, error = %e, "Failed to record down event");
                node
            }
        }
    }

    async fn clear_down_record(&self, node: Node) {
        if !node.history.has(EventKind::Down) {
            return;
        }
        let Some(allocation) = node.allocation.clone() else {
            error!(
                hostname = %node.hostname,
                "Active node has no allocation, skipping down bookkeeping"
            );
            return;
        };

        let _lock = self.repository.lock_application(&allocation.owner).await;
        let Some(fresh) = self
            .repository
            .node_in(&node.hostname, NodeState::Active)
            .await
        else {
            return;
        };
        if let Err(e) = self.repository.write(fresh.up()).await {
            warn!(hostname = %node.hostname, error = %e, "Failed to clear down event");
        }
    }

    async fn application_suspended(&self, node: &Node) -> bool {
        let Some(allocation) = &node.allocation else {
            error!(
                hostname = %node.hostname,
                "Active node has no allocation, skipping"
            );
            return true;
        };
        match self
            .orchestrator
            .application_status(&allocation.owner)
            .await
        {
            Ok(status) => status == ApplicationStatus::AllowedToBeDown,
            // An unknown application cannot veto failing
            Err(Error::ApplicationNotFound(_)) => false,
            Err(e) => {
                warn!(
                    application = %allocation.owner,
                    error = %e,
                    "Orchestrator unavailable, deferring node failing"
                );
                true
            }
        }
    }

    /// Any number of tenant and host nodes may be failed, because the
    /// operation only takes effect if the node is replaced. Other types are
    /// not replaced (all nodes of the type serve a single application), so at
    /// most one may sit in failed at a time to protect against runaway
    /// failing.
    async fn fail_allowed_for(&self, node_type: NodeType) -> bool {
        match node_type {
            NodeType::Tenant | NodeType::Host => true,
            _ => self
                .repository
                .nodes_of_type(node_type, NodeState::Failed)
                .await
                .is_empty(),
        }
    }

    async fn throttled(&self, node: &Node) -> bool {
        let nodes = self.repository.nodes().await;
        let throttled = self
            .throttle_policy
            .is_throttled(&nodes, self.clock.now());
        if throttled {
            info!(
                hostname = %node.hostname,
                policy = %self.throttle_policy,
                "Want to fail node, but throttling is in effect"
            );
        }
        throttled
    }

    async fn fail(&self, node: &Node, reason: &str) {
        if let Err(e) = self
            .repository
            .fail(&node.hostname, Agent::System, reason)
            .await
        {
            warn!(hostname = %node.hostname, error = %e, "Failed to fail node");
        }
    }

    /// Move an active node to failed and redeploy its application without
    /// it, or change nothing at all.
    ///
    /// For a host this first fails all its children: active children go
    /// through this same protocol recursively, others are failed directly.
    /// If redeployment cannot be activated the target is rolled back to
    /// active, but children failed along the way stay failed: activation
    /// almost always fails for lack of capacity, and re-animating children
    /// would recreate the exact precondition that prevented activation.
    ///
    /// Returns whether the node was successfully failed.
    fn fail_active<'a>(&'a self, node: &'a Node, reason: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let Some(allocation) = node.allocation.clone() else {
                error!(
                    hostname = %node.hostname,
                    "Active node has no allocation, cannot fail it"
                );
                return false;
            };

            let Some(deployment) = self
                .deployer
                .deploy_from_local_active(&allocation.owner, DEPLOY_TIMEOUT)
                .await
            else {
                // Another control-plane replica owns this deployment
                return false;
            };

            let _lock = self.repository.lock_application(&allocation.owner).await;

            let mut all_children_failed = true;
            for child in self.repository.child_nodes(&node.hostname).await {
                if child.state == NodeState::Active {
                    all_children_failed &= self.fail_active(&child, reason).await;
                } else if let Err(e) = self
                    .repository
                    .fail(&child.hostname, Agent::System, reason)
                    .await
                {
                    warn!(hostname = %child.hostname, error = %e, "Failed to fail child node");
                }
            }
            if !all_children_failed {
                return false;
            }

            if let Err(e) = self
                .repository
                .fail(&node.hostname, Agent::System, reason)
                .await
            {
                warn!(hostname = %node.hostname, error = %e, "Failed to fail node");
                return false;
            }

            match deployment.activate().await {
                Ok(()) => true,
                Err(e) => {
                    // The expected reason to end up here is that there is no
                    // capacity to redeploy, in which case the node must stay
                    // active to avoid failing additional nodes.
                    if let Err(re) = self
                        .repository
                        .reactivate(&node.hostname, Agent::System)
                        .await
                    {
                        error!(hostname = %node.hostname, error = %re, "Rollback to active failed");
                    }
                    warn!(
                        hostname = %node.hostname,
                        application = %allocation.owner,
                        error = %e,
                        "Attempted to fail node, but redeploying without it failed"
                    );
                    false
                }
            }
        })
    }
}

fn was_made_ready_before(node: &Node, instant: DateTime<Utc>) -> bool {
    node.history
        .event(EventKind::Readied)
        .is_some_and(|event| event.at < instant)
}

fn has_recorded_request_after(node: &Node, instant: DateTime<Utc>) -> bool {
    node.history
        .event(EventKind::Requested)
        .is_some_and(|event| event.at > instant)
}

#[async_trait::async_trait]
impl Maintainer for NodeFailer {
    fn name(&self) -> &'static str {
        "node-failer"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn step(&self) -> Result<()> {
        self.maintain().await
    }
}
