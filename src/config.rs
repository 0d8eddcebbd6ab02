//! Component factory for environment-based configuration
//!
//! Builds the repository backend and zone from environment variables,
//! enabling easy switching between development and production
//! configurations.

use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::repository::{InMemoryNodeRepository, NodeRepository};
use crate::{Error, Result};

/// Deployment environment of the zone this process maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Test,
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "test" => Ok(Environment::Test),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(Error::Config(format!(
                "Unknown environment '{other}'. Use one of [dev, test, staging, production]"
            ))),
        }
    }
}

/// The zone a warden process is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub environment: Environment,
}

impl Zone {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }
}

pub struct ComponentFactory;

impl ComponentFactory {
    /// Create the node repository from environment
    ///
    /// Environment variables:
    /// - REPOSITORY_BACKEND: "memory" (default)
    pub fn create_repository(clock: Arc<dyn Clock>) -> Result<Arc<dyn NodeRepository>> {
        let backend = std::env::var("REPOSITORY_BACKEND").unwrap_or_else(|_| "memory".to_string());

        match backend.as_str() {
            "memory" => {
                info!("Using in-memory node repository (development mode)");
                Ok(Arc::new(InMemoryNodeRepository::new(clock)))
            }
            _ => Err(Error::Config(format!(
                "Unknown REPOSITORY_BACKEND: {backend}. Use 'memory'"
            ))),
        }
    }

    /// Create the zone from environment
    ///
    /// Environment variables:
    /// - WARDEN_ENVIRONMENT: "dev" (default), "test", "staging" or
    ///   "production"
    pub fn create_zone() -> Result<Zone> {
        let environment = std::env::var("WARDEN_ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        Ok(Zone::new(environment.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!(
            "Production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert!(" staging ".parse::<Environment>().is_ok());
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_unknown_environment_names_the_offender() {
        let err = "qa".parse::<Environment>().unwrap_err();
        assert!(err.to_string().contains("qa"), "unexpected error: {err}");
    }
}
