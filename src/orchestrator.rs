//! Orchestrator interface
//!
//! The orchestrator knows whether an application is currently allowed to be
//! down (suspended for maintenance). Suspension is advisory: the failer
//! defers destructive action while it holds but never blocks on it.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;

use crate::node::ApplicationId;
use crate::{Error, Result};

/// The orchestrator's verdict on an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationStatus {
    NoRemarks,
    /// The application's nodes are allowed to be down right now
    AllowedToBeDown,
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Current status of the given application.
    ///
    /// Returns `Error::ApplicationNotFound` when the orchestrator does not
    /// know the application; callers treat that as "not suspended".
    async fn application_status(&self, application: &ApplicationId) -> Result<ApplicationStatus>;
}

/// In-memory orchestrator for development and testing.
pub struct InMemoryOrchestrator {
    known: RwLock<HashSet<ApplicationId>>,
    suspended: RwLock<HashSet<ApplicationId>>,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self {
            known: RwLock::new(HashSet::new()),
            suspended: RwLock::new(HashSet::new()),
        }
    }

    pub fn register_application(&self, application: ApplicationId) {
        self.known.write().insert(application);
    }

    pub fn suspend(&self, application: &ApplicationId) {
        self.suspended.write().insert(application.clone());
    }

    pub fn resume(&self, application: &ApplicationId) {
        self.suspended.write().remove(application);
    }
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn application_status(&self, application: &ApplicationId) -> Result<ApplicationStatus> {
        if !self.known.read().contains(application) {
            return Err(Error::ApplicationNotFound(application.clone()));
        }
        if self.suspended.read().contains(application) {
            Ok(ApplicationStatus::AllowedToBeDown)
        } else {
            Ok(ApplicationStatus::NoRemarks)
        }
    }
}
