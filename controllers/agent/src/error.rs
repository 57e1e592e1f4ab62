//! Agent-specific error types.

use network_store::StoreError;
use thiserror::Error;

use crate::applier::ApplyError;
use crate::healthcheck::HealthCheckError;

/// Errors that can occur in the node agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The config could not be applied
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// The node is unhealthy after applying a config
    #[error("Health check error: {0}")]
    HealthCheck(#[from] HealthCheckError),

    /// The on-disk config cache could not be read or written
    #[error("Cache error: {0}")]
    Cache(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
