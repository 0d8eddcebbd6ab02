//! hostwarden Warden Binary
//!
//! Background service that maintains the node repository: fails dead and
//! down nodes, and recycles or parks expired failed nodes.

use hostwarden::clock::SystemClock;
use hostwarden::config::ComponentFactory;
use hostwarden::deploy::InMemoryDeployer;
use hostwarden::liveness::InMemoryLivenessTracker;
use hostwarden::maintenance::{
    ExpirerConfig, FailedExpirer, FailerConfig, JobControl, MaintenanceScheduler, NodeFailer,
    ThrottlePolicy,
};
use hostwarden::monitor::InMemoryServiceMonitor;
use hostwarden::orchestrator::InMemoryOrchestrator;
use hostwarden::telemetry::Telemetry;

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

/// hostwarden Warden
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Grace between the first DOWN observation and failing, in seconds
    #[arg(long, env = "WARDEN_DOWN_TIME_LIMIT_SECS", default_value = "3600")]
    down_time_limit_secs: u64,

    /// Expected config request cadence of ready nodes, in seconds
    #[arg(long, env = "WARDEN_NODE_REQUEST_INTERVAL_SECS", default_value = "600")]
    node_request_interval_secs: u64,

    /// Minimum age in failed before a node is recycled, in seconds
    #[arg(long, env = "WARDEN_FAIL_TIMEOUT_SECS", default_value = "86400")]
    fail_timeout_secs: u64,

    /// Expirer check interval in seconds
    #[arg(long, env = "WARDEN_EXPIRER_INTERVAL_SECS", default_value = "600")]
    expirer_interval_secs: u64,

    /// Throttle policy: "hosted" or "disabled"
    #[arg(long, env = "WARDEN_THROTTLE_POLICY", default_value = "hosted")]
    throttle_policy: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _telemetry = Telemetry::init_for_component("hostwarden-warden", &args.log_level)?;

    info!("Starting hostwarden Warden");

    let throttle_policy = match args.throttle_policy.as_str() {
        "hosted" => ThrottlePolicy::hosted(),
        "disabled" => ThrottlePolicy::disabled(),
        other => {
            return Err(format!(
                "Unknown throttle policy '{other}'. Use 'hosted' or 'disabled'"
            )
            .into())
        }
    };

    let clock = Arc::new(SystemClock::new());
    let zone = ComponentFactory::create_zone()?;
    let repository = ComponentFactory::create_repository(clock.clone())?;

    let liveness = Arc::new(InMemoryLivenessTracker::new(clock.clone()));
    let monitor = Arc::new(InMemoryServiceMonitor::new(repository.clone()));
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let deployer = Arc::new(InMemoryDeployer::new(repository.clone(), clock.clone()));

    let failer_config = FailerConfig {
        down_time_limit: Duration::from_secs(args.down_time_limit_secs),
        node_request_interval: Duration::from_secs(args.node_request_interval_secs),
    };
    let failer = Arc::new(NodeFailer::new(
        repository.clone(),
        liveness,
        monitor,
        orchestrator,
        deployer,
        clock.clone(),
        failer_config,
        throttle_policy,
    ));

    let expirer_config = ExpirerConfig {
        fail_timeout: Duration::from_secs(args.fail_timeout_secs),
        interval: Duration::from_secs(args.expirer_interval_secs),
    };
    let expirer = Arc::new(FailedExpirer::new(
        repository,
        clock,
        zone,
        expirer_config,
    ));

    let job_control = Arc::new(JobControl::new());
    let scheduler = MaintenanceScheduler::new(job_control);
    scheduler.register(failer);
    scheduler.register(expirer);

    info!(
        down_time_limit_secs = args.down_time_limit_secs,
        fail_timeout_secs = args.fail_timeout_secs,
        throttle_policy = %args.throttle_policy,
        environment = ?zone.environment,
        "Warden ready"
    );

    shutdown_signal().await;

    info!("Warden shutting down");
    scheduler.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
