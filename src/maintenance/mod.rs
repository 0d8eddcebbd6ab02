//! Periodic maintenance of the node repository
//!
//! Each maintenance concern is a `Maintainer`: a named task stepped on a
//! fixed interval. The scheduler runs every registered maintainer on its own
//! cadence, consults the job-control gate before each tick, and survives
//! step failures. Maintainers hold no state between ticks; every decision is
//! re-derived from the repository, so a failed tick heals itself on the next
//! one.

pub mod failed_expirer;
pub mod node_failer;
pub mod throttle;

pub use failed_expirer::{ExpirerConfig, FailedExpirer};
pub use node_failer::{FailerConfig, NodeFailer};
pub use throttle::ThrottlePolicy;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;

/// A periodic maintenance task.
#[async_trait]
pub trait Maintainer: Send + Sync {
    /// Stable name, used by the job-control gate and in logs.
    fn name(&self) -> &'static str;

    /// How often `step` runs.
    fn interval(&self) -> Duration;

    /// One tick of maintenance. Errors are logged by the scheduler and never
    /// abort the schedule.
    async fn step(&self) -> Result<()>;
}

/// Operator gate over maintenance jobs.
///
/// A deactivated job keeps its schedule; its ticks become no-ops until it is
/// activated again.
pub struct JobControl {
    inactive: RwLock<HashSet<String>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self {
            inactive: RwLock::new(HashSet::new()),
        }
    }

    pub fn is_active(&self, job: &str) -> bool {
        !self.inactive.read().contains(job)
    }

    pub fn set_active(&self, job: &str, active: bool) {
        let mut inactive = self.inactive.write();
        if active {
            inactive.remove(job);
        } else {
            inactive.insert(job.to_string());
        }
    }
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs registered maintainers until shut down.
pub struct MaintenanceScheduler {
    job_control: Arc<JobControl>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
    pub fn new(job_control: Arc<JobControl>) -> Self {
        Self {
            job_control,
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Get a cancellation token that can be used to trigger graceful shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start stepping the given maintainer on its interval.
    ///
    /// Skipped ticks (gate closed, slow steps) are not caught up; the next
    /// tick stays on the original cadence.
    pub fn register(&self, maintainer: Arc<dyn Maintainer>) {
        let job_control = self.job_control.clone();
        let shutdown = self.shutdown.clone();
        let name = maintainer.name();
        info!(
            maintainer = name,
            interval_secs = maintainer.interval().as_secs(),
            "Registering maintainer"
        );

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(maintainer.interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !job_control.is_active(name) {
                            debug!(maintainer = name, "Tick skipped, job is deactivated");
                            continue;
                        }
                        if let Err(e) = maintainer.step().await {
                            error!(maintainer = name, error = %e, "Maintenance step failed");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!(maintainer = name, "Maintainer shutting down");
                        break;
                    }
                }
            }
        });
        self.handles.lock().push(handle);
    }

    /// Stop all maintainers and wait for their loops to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}
