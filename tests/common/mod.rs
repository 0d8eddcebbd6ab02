//! Shared world for maintenance integration tests
//!
//! Builds a complete in-memory zone (repository, liveness tracker, service
//! monitor, orchestrator, deployer) around a manual clock, plus constructors
//! for the standard fleet shapes the tests exercise.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hostwarden::clock::{Clock, ManualClock};
use hostwarden::config::{Environment, Zone};
use hostwarden::deploy::{ClusterSpec, Deployer, InMemoryDeployer};
use hostwarden::liveness::InMemoryLivenessTracker;
use hostwarden::maintenance::{
    ExpirerConfig, FailedExpirer, FailerConfig, NodeFailer, ThrottlePolicy,
};
use hostwarden::monitor::InMemoryServiceMonitor;
use hostwarden::node::{
    Agent, Allocation, ApplicationId, Event, EventKind, Flavor, Node, NodeState, NodeType,
};
use hostwarden::orchestrator::InMemoryOrchestrator;
use hostwarden::repository::{InMemoryNodeRepository, NodeRepository};

pub fn app1() -> ApplicationId {
    ApplicationId::new("app1")
}

pub fn app2() -> ApplicationId {
    ApplicationId::new("app2")
}

pub fn infrastructure_app() -> ApplicationId {
    ApplicationId::new("infrastructure")
}

pub fn routing_app() -> ApplicationId {
    ApplicationId::new("routing")
}

pub struct FailTester {
    pub clock: Arc<ManualClock>,
    pub repository: Arc<InMemoryNodeRepository>,
    pub liveness: Arc<InMemoryLivenessTracker>,
    pub monitor: Arc<InMemoryServiceMonitor>,
    pub orchestrator: Arc<InMemoryOrchestrator>,
    pub deployer: Arc<InMemoryDeployer>,
    pub failer: NodeFailer,
    failer_config: FailerConfig,
    throttle_policy: ThrottlePolicy,
}

impl FailTester {
    pub fn new(failer_config: FailerConfig, throttle_policy: ThrottlePolicy) -> Self {
        let clock = Arc::new(ManualClock::new());
        let repository = Arc::new(InMemoryNodeRepository::new(clock.clone()));
        let liveness = Arc::new(InMemoryLivenessTracker::new(clock.clone()));
        let monitor = Arc::new(InMemoryServiceMonitor::new(
            repository.clone() as Arc<dyn NodeRepository>
        ));
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        let deployer = Arc::new(InMemoryDeployer::new(
            repository.clone() as Arc<dyn NodeRepository>,
            clock.clone(),
        ));
        let failer = NodeFailer::new(
            repository.clone(),
            liveness.clone(),
            monitor.clone(),
            orchestrator.clone(),
            deployer.clone(),
            clock.clone(),
            failer_config.clone(),
            throttle_policy.clone(),
        );
        Self {
            clock,
            repository,
            liveness,
            monitor,
            orchestrator,
            deployer,
            failer,
            failer_config,
            throttle_policy,
        }
    }

    /// Two tenant applications (5 + 7 nodes) drawn from 16 ready nodes,
    /// leaving 4 in ready. Throttle disabled.
    pub async fn with_two_applications() -> Self {
        Self::with_two_applications_and(FailerConfig::default()).await
    }

    pub async fn with_two_applications_and(failer_config: FailerConfig) -> Self {
        let tester = Self::new(failer_config, ThrottlePolicy::disabled());
        tester.create_ready_nodes(16, 0).await;
        tester.activate_cluster(app1(), NodeType::Tenant, 5).await;
        tester.activate_cluster(app2(), NodeType::Tenant, 7).await;
        tester
    }

    /// Three active hosts carrying container children for two tenant
    /// applications, plus spare ready containers for replacements.
    ///
    /// host-001 carries one active child of each application; the spare
    /// containers live on the other hosts.
    pub async fn with_applications_on_hosts() -> Self {
        let tester = Self::new(FailerConfig::default(), ThrottlePolicy::disabled());

        for (i, hostname) in ["host-001", "host-002", "host-003"].iter().enumerate() {
            tester
                .seed_active_node(
                    Node::new(*hostname, NodeType::Host, Flavor::bare_metal("d-16-64-500")),
                    infrastructure_app(),
                    i as u32,
                )
                .await;
        }
        tester
            .deployer
            .register_cluster(infrastructure_app(), ClusterSpec::type_scoped(NodeType::Host));
        tester
            .orchestrator
            .register_application(infrastructure_app());

        for (hostname, parent) in [
            ("child-101", "host-001"),
            ("child-102", "host-002"),
            ("child-201", "host-001"),
            ("child-202", "host-003"),
            ("child-901", "host-002"),
            ("child-902", "host-003"),
        ] {
            tester.seed_ready_container(hostname, parent).await;
        }
        tester.activate_cluster(app1(), NodeType::Tenant, 2).await;
        tester.activate_cluster(app2(), NodeType::Tenant, 2).await;
        tester
    }

    /// One type-scoped application spanning 16 active proxy nodes.
    pub async fn with_proxy_application() -> Self {
        let tester = Self::new(FailerConfig::default(), ThrottlePolicy::disabled());
        for i in 0..16 {
            tester
                .seed_active_node(
                    Node::new(
                        format!("proxy-{i:03}"),
                        NodeType::Proxy,
                        Flavor::bare_metal("d-4-16-100"),
                    ),
                    routing_app(),
                    i,
                )
                .await;
        }
        tester
            .deployer
            .register_cluster(routing_app(), ClusterSpec::type_scoped(NodeType::Proxy));
        tester.orchestrator.register_application(routing_app());
        tester
    }

    /// An empty repository; nodes are created by the test.
    pub fn with_no_applications(throttle_policy: ThrottlePolicy) -> Self {
        Self::new(FailerConfig::default(), throttle_policy)
    }

    /// Replace the failer with a fresh instance, resetting its
    /// construction-time grace window.
    pub fn recreate_failer(&mut self) {
        self.failer = NodeFailer::new(
            self.repository.clone(),
            self.liveness.clone(),
            self.monitor.clone(),
            self.orchestrator.clone(),
            self.deployer.clone(),
            self.clock.clone(),
            self.failer_config.clone(),
            self.throttle_policy.clone(),
        );
    }

    /// A failed-node expirer over this world.
    pub fn expirer(&self, environment: Environment, fail_timeout: Duration) -> FailedExpirer {
        FailedExpirer::new(
            self.repository.clone(),
            self.clock.clone(),
            Zone::new(environment),
            ExpirerConfig {
                fail_timeout,
                ..Default::default()
            },
        )
    }

    pub async fn run_failer(&self) {
        self.failer.maintain().await.expect("failer tick");
    }

    /// Create bare-metal tenant nodes in ready.
    pub async fn create_ready_nodes(&self, count: usize, start: usize) -> Vec<Node> {
        let mut nodes = Vec::with_capacity(count);
        for i in start..start + count {
            let node = self
                .seed_ready_node(Node::new(
                    format!("node-{i:03}"),
                    NodeType::Tenant,
                    Flavor::bare_metal("d-2-8-50"),
                ))
                .await;
            nodes.push(node);
        }
        nodes
    }

    /// Create containerized tenant nodes in ready.
    pub async fn create_ready_docker_nodes(&self, count: usize, start: usize) -> Vec<Node> {
        let mut nodes = Vec::with_capacity(count);
        for i in start..start + count {
            let node = self
                .seed_ready_node(Node::new(
                    format!("container-{i:03}"),
                    NodeType::Tenant,
                    Flavor::docker_container("d-1-4-100"),
                ))
                .await;
            nodes.push(node);
        }
        nodes
    }

    /// Create host nodes in ready.
    pub async fn create_ready_host_nodes(&self, count: usize, start: usize) -> Vec<Node> {
        let mut nodes = Vec::with_capacity(count);
        for i in start..start + count {
            let node = self
                .seed_ready_node(Node::new(
                    format!("ready-host-{i:03}"),
                    NodeType::Host,
                    Flavor::bare_metal("d-16-64-500"),
                ))
                .await;
            nodes.push(node);
        }
        nodes
    }

    async fn seed_ready_node(&self, mut node: Node) -> Node {
        node.state = NodeState::Ready;
        node.history = node.history.clone().with(Event::new(
            EventKind::Readied,
            Agent::System,
            self.clock.now(),
        ));
        self.repository.write(node).await.expect("seed ready node")
    }

    async fn seed_ready_container(&self, hostname: &str, parent: &str) -> Node {
        self.seed_ready_node(
            Node::new(
                hostname,
                NodeType::Tenant,
                Flavor::docker_container("d-1-4-100"),
            )
            .with_parent(parent),
        )
        .await
    }

    async fn seed_active_node(&self, mut node: Node, owner: ApplicationId, index: u32) -> Node {
        node.state = NodeState::Active;
        node.allocation = Some(Allocation { owner, index });
        node.history = node.history.clone().with(Event::new(
            EventKind::Activated,
            Agent::Application,
            self.clock.now(),
        ));
        self.repository.write(node).await.expect("seed active node")
    }

    /// Register and deploy a fixed-size cluster, drawing nodes from ready.
    async fn activate_cluster(&self, application: ApplicationId, node_type: NodeType, count: usize) {
        self.deployer
            .register_cluster(application.clone(), ClusterSpec::fixed(node_type, count));
        self.orchestrator.register_application(application.clone());
        let deployment = self
            .deployer
            .deploy_from_local_active(&application, Duration::from_secs(30 * 60))
            .await
            .expect("deployment owned here");
        deployment.activate().await.expect("initial activation");
    }

    /// Record a config request from every node.
    pub async fn all_nodes_make_config_request(&self) {
        self.all_nodes_make_config_request_except(&[]).await;
    }

    /// Record a config request from every node except the named ones.
    pub async fn all_nodes_make_config_request_except(&self, except: &[&str]) {
        for node in self.repository.nodes().await {
            if except.contains(&node.hostname.as_str()) {
                continue;
            }
            self.liveness.record_request(&node.hostname);
        }
    }

    pub async fn node(&self, hostname: &str) -> Node {
        self.repository
            .node(hostname)
            .await
            .unwrap_or_else(|| panic!("node {hostname} not in repository"))
    }

    pub async fn state_of(&self, hostname: &str) -> NodeState {
        self.node(hostname).await.state
    }

    pub async fn count(&self, node_type: NodeType, state: NodeState) -> usize {
        self.repository.nodes_of_type(node_type, state).await.len()
    }

    /// Failed nodes that are not docker containers.
    pub async fn non_container_failed(&self) -> Vec<Node> {
        self.repository
            .nodes_in(NodeState::Failed)
            .await
            .into_iter()
            .filter(|n| !n.is_docker_container())
            .collect()
    }

    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }
}

pub fn minutes(count: u64) -> Duration {
    Duration::from_secs(count * 60)
}

pub fn hours(count: u64) -> Duration {
    Duration::from_secs(count * 60 * 60)
}
