//! Controller-specific error types.

use crds::RevisionError;
use network_store::StoreError;
use thiserror::Error;

use crate::projection::ProjectionError;

/// Errors that can occur in the network operator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A revision could not be projected onto a node
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    /// Revision digest could not be computed
    #[error("Hashing error: {0}")]
    Hashing(#[from] RevisionError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// True when the underlying store call hit its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ControllerError::Store(e) if e.is_timeout())
    }
}
