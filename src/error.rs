//! Error types for hostwarden

use crate::node::{ApplicationId, NodeState};

/// Result type alias for hostwarden operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for hostwarden
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Node not present in the repository
    #[error("Node not found: {hostname}")]
    NodeNotFound { hostname: String },
    /// Operation requires an allocation the node does not have
    #[error("Node {hostname} has no allocation")]
    MissingAllocation { hostname: String },
    /// Application unknown to the collaborator that was asked about it
    #[error("Application not found: {0}")]
    ApplicationNotFound(ApplicationId),
    /// Not enough ready nodes to complete a redeployment
    #[error("Out of capacity for {application}: needed {needed} ready nodes, {available} available")]
    OutOfCapacity {
        application: ApplicationId,
        needed: usize,
        available: usize,
    },
    /// Disallowed node state transition
    #[error("Invalid state transition for {hostname}: {from:?} -> {to:?}")]
    InvalidTransition {
        hostname: String,
        from: NodeState,
        to: NodeState,
    },
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
