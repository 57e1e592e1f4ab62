//! Kubernetes-backed store

use crate::error::StoreError;
use crate::store_trait::NetworkStore;
use crds::{
    BGPPeering, Layer2NetworkConfiguration, NetworkConfigRevision, NetworkConfigRevisionStatus,
    NodeNetworkConfig, NodeNetworkConfigStatus, RoutingTable, VRFRouteConfiguration,
};
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// [`NetworkStore`] over the Kubernetes API
///
/// Every call is bounded by `timeout`; an expired call surfaces as
/// [`StoreError::Timeout`].
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    timeout: Duration,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Create a new store
    #[must_use]
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn call<T, F>(&self, what: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| StoreError::from_kube(e, what)),
            Err(_elapsed) => Err(StoreError::Timeout(what.to_string())),
        }
    }

    fn revisions(&self) -> Api<NetworkConfigRevision> {
        Api::all(self.client.clone())
    }

    fn node_configs(&self) -> Api<NodeNetworkConfig> {
        Api::all(self.client.clone())
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

#[async_trait::async_trait]
impl NetworkStore for KubeStore {
    async fn list_revisions(&self) -> Result<Vec<NetworkConfigRevision>, StoreError> {
        let api = self.revisions();
        let list = self
            .call("networkconfigrevisions", api.list(&ListParams::default()))
            .await?;
        let mut revisions = list.items;
        revisions.sort_by(|a, b| {
            b.metadata
                .creation_timestamp
                .cmp(&a.metadata.creation_timestamp)
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        });
        Ok(revisions)
    }

    async fn create_revision(
        &self,
        revision: &NetworkConfigRevision,
    ) -> Result<NetworkConfigRevision, StoreError> {
        let api = self.revisions();
        let name = revision.metadata.name.clone().unwrap_or_default();
        self.call(
            &format!("networkconfigrevision/{name}"),
            api.create(&PostParams::default(), revision),
        )
        .await
    }

    async fn delete_revision(&self, name: &str) -> Result<(), StoreError> {
        let api = self.revisions();
        self.call(
            &format!("networkconfigrevision/{name}"),
            api.delete(name, &DeleteParams::default()),
        )
        .await?;
        debug!("Deleted NetworkConfigRevision {}", name);
        Ok(())
    }

    async fn update_revision_status(
        &self,
        name: &str,
        status: &NetworkConfigRevisionStatus,
    ) -> Result<NetworkConfigRevision, StoreError> {
        let api = self.revisions();
        let patch = json!({ "status": status });
        self.call(
            &format!("networkconfigrevision/{name}"),
            api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await
    }

    async fn list_node_configs(&self) -> Result<Vec<NodeNetworkConfig>, StoreError> {
        let api = self.node_configs();
        let list = self
            .call("nodenetworkconfigs", api.list(&ListParams::default()))
            .await?;
        Ok(list.items)
    }

    async fn get_node_config(&self, name: &str) -> Result<NodeNetworkConfig, StoreError> {
        let api = self.node_configs();
        self.call(&format!("nodenetworkconfig/{name}"), api.get(name))
            .await
    }

    async fn create_node_config(
        &self,
        config: &NodeNetworkConfig,
    ) -> Result<NodeNetworkConfig, StoreError> {
        let api = self.node_configs();
        let name = config.metadata.name.clone().unwrap_or_default();
        self.call(
            &format!("nodenetworkconfig/{name}"),
            api.create(&PostParams::default(), config),
        )
        .await
    }

    async fn update_node_config(
        &self,
        config: &NodeNetworkConfig,
    ) -> Result<NodeNetworkConfig, StoreError> {
        let api = self.node_configs();
        let name = config.metadata.name.clone().unwrap_or_default();
        self.call(
            &format!("nodenetworkconfig/{name}"),
            api.replace(&name, &PostParams::default(), config),
        )
        .await
    }

    async fn update_node_config_status(
        &self,
        name: &str,
        status: &NodeNetworkConfigStatus,
    ) -> Result<NodeNetworkConfig, StoreError> {
        let api = self.node_configs();
        let patch = json!({ "status": status });
        self.call(
            &format!("nodenetworkconfig/{name}"),
            api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await
    }

    async fn delete_node_config(&self, name: &str) -> Result<(), StoreError> {
        let api = self.node_configs();
        self.call(
            &format!("nodenetworkconfig/{name}"),
            api.delete(name, &DeleteParams::default()),
        )
        .await?;
        debug!("Deleted NodeNetworkConfig {}", name);
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let api = self.nodes();
        let list = self.call("nodes", api.list(&ListParams::default())).await?;
        Ok(list.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node, StoreError> {
        let api = self.nodes();
        self.call(&format!("node/{name}"), api.get(name)).await
    }

    async fn update_node(&self, node: &Node) -> Result<Node, StoreError> {
        let api = self.nodes();
        let name = node.metadata.name.clone().unwrap_or_default();
        self.call(
            &format!("node/{name}"),
            api.replace(&name, &PostParams::default(), node),
        )
        .await
    }

    async fn list_layer2s(&self) -> Result<Vec<Layer2NetworkConfiguration>, StoreError> {
        let api: Api<Layer2NetworkConfiguration> = Api::all(self.client.clone());
        let list = self
            .call("layer2networkconfigurations", api.list(&ListParams::default()))
            .await?;
        Ok(list.items)
    }

    async fn list_vrfs(&self) -> Result<Vec<VRFRouteConfiguration>, StoreError> {
        let api: Api<VRFRouteConfiguration> = Api::all(self.client.clone());
        let list = self
            .call("vrfrouteconfigurations", api.list(&ListParams::default()))
            .await?;
        Ok(list.items)
    }

    async fn list_bgp_peerings(&self) -> Result<Vec<BGPPeering>, StoreError> {
        let api: Api<BGPPeering> = Api::all(self.client.clone());
        let list = self
            .call("bgppeerings", api.list(&ListParams::default()))
            .await?;
        Ok(list.items)
    }

    async fn list_routing_tables(&self) -> Result<Vec<RoutingTable>, StoreError> {
        let api: Api<RoutingTable> = Api::all(self.client.clone());
        let list = self
            .call("routingtables", api.list(&ListParams::default()))
            .await?;
        Ok(list.items)
    }
}
