//! NetworkStore trait for mocking
//!
//! Abstracts the declarative object store so the control loops can be unit
//! tested against the in-memory mock.

use crate::error::StoreError;
use crds::{
    BGPPeering, Layer2NetworkConfiguration, NetworkConfigRevision, NetworkConfigRevisionStatus,
    NodeNetworkConfig, NodeNetworkConfigStatus, RoutingTable, VRFRouteConfiguration,
};
use k8s_openapi::api::core::v1::Node;

/// Object store operations used by the operator and the agent
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait NetworkStore: Send + Sync {
    // Revisions

    /// Lists revisions, newest-created first.
    async fn list_revisions(&self) -> Result<Vec<NetworkConfigRevision>, StoreError>;
    async fn create_revision(
        &self,
        revision: &NetworkConfigRevision,
    ) -> Result<NetworkConfigRevision, StoreError>;
    async fn delete_revision(&self, name: &str) -> Result<(), StoreError>;
    async fn update_revision_status(
        &self,
        name: &str,
        status: &NetworkConfigRevisionStatus,
    ) -> Result<NetworkConfigRevision, StoreError>;

    // Node network configs

    async fn list_node_configs(&self) -> Result<Vec<NodeNetworkConfig>, StoreError>;
    async fn get_node_config(&self, name: &str) -> Result<NodeNetworkConfig, StoreError>;
    async fn create_node_config(
        &self,
        config: &NodeNetworkConfig,
    ) -> Result<NodeNetworkConfig, StoreError>;
    /// Replaces spec and metadata. Rejected with `Conflict` when the
    /// resourceVersion is stale.
    async fn update_node_config(
        &self,
        config: &NodeNetworkConfig,
    ) -> Result<NodeNetworkConfig, StoreError>;
    async fn update_node_config_status(
        &self,
        name: &str,
        status: &NodeNetworkConfigStatus,
    ) -> Result<NodeNetworkConfig, StoreError>;
    async fn delete_node_config(&self, name: &str) -> Result<(), StoreError>;

    // Nodes

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;
    async fn get_node(&self, name: &str) -> Result<Node, StoreError>;
    async fn update_node(&self, node: &Node) -> Result<Node, StoreError>;

    // Intent objects

    async fn list_layer2s(&self) -> Result<Vec<Layer2NetworkConfiguration>, StoreError>;
    async fn list_vrfs(&self) -> Result<Vec<VRFRouteConfiguration>, StoreError>;
    async fn list_bgp_peerings(&self) -> Result<Vec<BGPPeering>, StoreError>;
    async fn list_routing_tables(&self) -> Result<Vec<RoutingTable>, StoreError>;
}
