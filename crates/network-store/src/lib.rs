//! Network object store
//!
//! Typed access to the declarative objects the rollout is built on:
//! intent objects, revisions, per-node configs and Nodes.
//!
//! [`KubeStore`] talks to the Kubernetes API. With the `test-util` feature,
//! [`MockStore`] keeps everything in memory and emulates resourceVersion
//! checks and owner-reference garbage collection.

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeStore;
pub use error::StoreError;
pub use store_trait::NetworkStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockStore;
