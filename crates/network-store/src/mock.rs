//! Mock NetworkStore for unit testing
//!
//! Keeps every object in memory. Creates assign a uid and a resourceVersion,
//! updates carrying a stale resourceVersion are rejected, and deleting an
//! owner strips it from its dependents' owner references (dependents left
//! without any owner are deleted, like the Kubernetes garbage collector).

use crate::error::StoreError;
use crate::store_trait::NetworkStore;
use crds::{
    BGPPeering, BGPPeeringSpec, Layer2NetworkConfiguration, Layer2NetworkConfigurationSpec,
    NetworkConfigRevision, NetworkConfigRevisionStatus, NodeNetworkConfig,
    NodeNetworkConfigStatus, RoutingTable, RoutingTableSpec, VRFRouteConfiguration,
    VRFRouteConfigurationSpec,
};
use k8s_openapi::api::core::v1::Node;
use kube::Resource;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Stored<K> {
    seq: u64,
    object: K,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    revisions: BTreeMap<String, Stored<NetworkConfigRevision>>,
    node_configs: BTreeMap<String, Stored<NodeNetworkConfig>>,
    nodes: BTreeMap<String, Stored<Node>>,
    layer2s: BTreeMap<String, Layer2NetworkConfiguration>,
    vrfs: BTreeMap<String, VRFRouteConfiguration>,
    bgp_peerings: BTreeMap<String, BGPPeering>,
    routing_tables: BTreeMap<String, RoutingTable>,
    node_config_timeouts: u32,
    node_config_status_timeouts: u32,
    node_config_writes: u32,
}

/// In-memory [`NetworkStore`]
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<State>>,
}

fn object_name<K: Resource>(object: &K) -> String {
    object.meta().name.clone().unwrap_or_default()
}

fn insert_new<K: Resource + Clone>(
    next_seq: &mut u64,
    map: &mut BTreeMap<String, Stored<K>>,
    object: &K,
    kind: &str,
) -> Result<K, StoreError> {
    let name = object_name(object);
    if map.contains_key(&name) {
        return Err(StoreError::AlreadyExists(format!("{kind}/{name}")));
    }
    *next_seq += 1;
    let mut object = object.clone();
    let meta = object.meta_mut();
    meta.uid = Some(uuid::Uuid::new_v4().to_string());
    meta.resource_version = Some(next_seq.to_string());
    map.insert(
        name,
        Stored {
            seq: *next_seq,
            object: object.clone(),
        },
    );
    Ok(object)
}

/// Stores `object` under its name, replacing any previous entry but keeping
/// its uid.
fn upsert<K: Resource>(
    next_seq: &mut u64,
    map: &mut BTreeMap<String, Stored<K>>,
    mut object: K,
) {
    let name = object_name(&object);
    *next_seq += 1;
    let uid = map
        .get(&name)
        .and_then(|stored| stored.object.meta().uid.clone())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let meta = object.meta_mut();
    meta.uid = Some(uid);
    meta.resource_version = Some(next_seq.to_string());
    map.insert(
        name,
        Stored {
            seq: *next_seq,
            object,
        },
    );
}

fn replace_existing<K: Resource + Clone>(
    next_seq: &mut u64,
    map: &mut BTreeMap<String, Stored<K>>,
    object: &K,
    kind: &str,
) -> Result<K, StoreError> {
    let name = object_name(object);
    let stored = map
        .get_mut(&name)
        .ok_or_else(|| StoreError::NotFound(format!("{kind}/{name}")))?;
    if let Some(version) = &object.meta().resource_version
        && stored.object.meta().resource_version.as_ref() != Some(version)
    {
        return Err(StoreError::Conflict(format!("{kind}/{name}")));
    }
    *next_seq += 1;
    let mut object = object.clone();
    let meta = object.meta_mut();
    meta.uid.clone_from(&stored.object.meta().uid);
    meta.resource_version = Some(next_seq.to_string());
    stored.object = object.clone();
    Ok(object)
}

impl State {
    /// Removes `uid` from every node config's owners, deleting configs left
    /// without owners.
    fn collect_garbage(&mut self, uid: Option<&str>) {
        let Some(uid) = uid else {
            return;
        };
        let mut orphaned = Vec::new();
        for (name, stored) in &mut self.node_configs {
            let Some(refs) = stored.object.metadata.owner_references.as_mut() else {
                continue;
            };
            let before = refs.len();
            refs.retain(|r| r.uid != uid);
            if before > 0 && refs.is_empty() {
                orphaned.push(name.clone());
            }
        }
        for name in orphaned {
            self.node_configs.remove(&name);
        }
    }

    fn take_node_config_timeout(&mut self, name: &str) -> Result<(), StoreError> {
        self.node_config_writes += 1;
        if self.node_config_timeouts > 0 {
            self.node_config_timeouts -= 1;
            return Err(StoreError::Timeout(format!("nodenetworkconfig/{name}")));
        }
        Ok(())
    }

    fn take_node_config_status_timeout(&mut self, name: &str) -> Result<(), StoreError> {
        if self.node_config_status_timeouts > 0 {
            self.node_config_status_timeouts -= 1;
            return Err(StoreError::Timeout(format!("nodenetworkconfig/{name}/status")));
        }
        Ok(())
    }
}

impl MockStore {
    /// Create an empty mock store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a node (for test setup)
    pub fn add_node(&self, node: Node) {
        let mut state = self.state();
        let State {
            next_seq, nodes, ..
        } = &mut *state;
        upsert(next_seq, nodes, node);
    }

    /// Delete a node and garbage-collect the configs it owned
    pub fn remove_node(&self, name: &str) {
        let mut state = self.state();
        if let Some(stored) = state.nodes.remove(name) {
            state.collect_garbage(stored.object.metadata.uid.as_deref());
        }
    }

    /// Add or replace a Layer2NetworkConfiguration (for test setup)
    pub fn add_layer2(&self, name: &str, spec: Layer2NetworkConfigurationSpec) {
        self.state()
            .layer2s
            .insert(name.to_string(), Layer2NetworkConfiguration::new(name, spec));
    }

    /// Add or replace a VRFRouteConfiguration (for test setup)
    pub fn add_vrf(&self, name: &str, spec: VRFRouteConfigurationSpec) {
        self.state()
            .vrfs
            .insert(name.to_string(), VRFRouteConfiguration::new(name, spec));
    }

    /// Add or replace a BGPPeering (for test setup)
    pub fn add_bgp_peering(&self, name: &str, spec: BGPPeeringSpec) {
        self.state()
            .bgp_peerings
            .insert(name.to_string(), BGPPeering::new(name, spec));
    }

    /// Add or replace a RoutingTable (for test setup)
    pub fn add_routing_table(&self, name: &str, spec: RoutingTableSpec) {
        self.state()
            .routing_tables
            .insert(name.to_string(), RoutingTable::new(name, spec));
    }

    /// Remove a Layer2NetworkConfiguration
    pub fn remove_layer2(&self, name: &str) {
        self.state().layer2s.remove(name);
    }

    /// Insert or replace a node config as-is, bypassing create semantics
    /// (for test setup)
    pub fn put_node_config(&self, config: NodeNetworkConfig) {
        let mut state = self.state();
        let State {
            next_seq,
            node_configs,
            ..
        } = &mut *state;
        upsert(next_seq, node_configs, config);
    }

    /// Fail the next `count` node config writes with [`StoreError::Timeout`]
    pub fn fail_node_config_writes(&self, count: u32) {
        self.state().node_config_timeouts = count;
    }

    /// Fail the next `count` node config status writes with
    /// [`StoreError::Timeout`]
    pub fn fail_node_config_status_writes(&self, count: u32) {
        self.state().node_config_status_timeouts = count;
    }

    /// Number of node config create/update attempts seen so far
    #[must_use]
    pub fn node_config_writes(&self) -> u32 {
        self.state().node_config_writes
    }

    /// Stored revision by name
    #[must_use]
    pub fn revision(&self, name: &str) -> Option<NetworkConfigRevision> {
        self.state().revisions.get(name).map(|s| s.object.clone())
    }

    /// Stored node config by name
    #[must_use]
    pub fn node_config(&self, name: &str) -> Option<NodeNetworkConfig> {
        self.state().node_configs.get(name).map(|s| s.object.clone())
    }

    /// Stored node by name
    #[must_use]
    pub fn node(&self, name: &str) -> Option<Node> {
        self.state().nodes.get(name).map(|s| s.object.clone())
    }
}

#[async_trait::async_trait]
impl NetworkStore for MockStore {
    async fn list_revisions(&self) -> Result<Vec<NetworkConfigRevision>, StoreError> {
        let state = self.state();
        let mut stored: Vec<&Stored<NetworkConfigRevision>> = state.revisions.values().collect();
        stored.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(stored.into_iter().map(|s| s.object.clone()).collect())
    }

    async fn create_revision(
        &self,
        revision: &NetworkConfigRevision,
    ) -> Result<NetworkConfigRevision, StoreError> {
        let mut state = self.state();
        let State {
            next_seq,
            revisions,
            ..
        } = &mut *state;
        insert_new(next_seq, revisions, revision, "networkconfigrevision")
    }

    async fn delete_revision(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        let stored = state
            .revisions
            .remove(name)
            .ok_or_else(|| StoreError::NotFound(format!("networkconfigrevision/{name}")))?;
        state.collect_garbage(stored.object.metadata.uid.as_deref());
        Ok(())
    }

    async fn update_revision_status(
        &self,
        name: &str,
        status: &NetworkConfigRevisionStatus,
    ) -> Result<NetworkConfigRevision, StoreError> {
        let mut state = self.state();
        state.next_seq += 1;
        let version = state.next_seq.to_string();
        let stored = state
            .revisions
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(format!("networkconfigrevision/{name}")))?;
        stored.object.status = Some(status.clone());
        stored.object.metadata.resource_version = Some(version);
        Ok(stored.object.clone())
    }

    async fn list_node_configs(&self) -> Result<Vec<NodeNetworkConfig>, StoreError> {
        Ok(self
            .state()
            .node_configs
            .values()
            .map(|s| s.object.clone())
            .collect())
    }

    async fn get_node_config(&self, name: &str) -> Result<NodeNetworkConfig, StoreError> {
        self.node_config(name)
            .ok_or_else(|| StoreError::NotFound(format!("nodenetworkconfig/{name}")))
    }

    async fn create_node_config(
        &self,
        config: &NodeNetworkConfig,
    ) -> Result<NodeNetworkConfig, StoreError> {
        let mut state = self.state();
        state.take_node_config_timeout(&object_name(config))?;
        let State {
            next_seq,
            node_configs,
            ..
        } = &mut *state;
        insert_new(next_seq, node_configs, config, "nodenetworkconfig")
    }

    async fn update_node_config(
        &self,
        config: &NodeNetworkConfig,
    ) -> Result<NodeNetworkConfig, StoreError> {
        let mut state = self.state();
        let name = object_name(config);
        state.take_node_config_timeout(&name)?;
        let State {
            next_seq,
            node_configs,
            ..
        } = &mut *state;
        let status = node_configs
            .get(&name)
            .and_then(|s| s.object.status.clone());
        let mut updated = replace_existing(next_seq, node_configs, config, "nodenetworkconfig")?;
        updated.status = status;
        if let Some(stored) = node_configs.get_mut(&name) {
            stored.object.status.clone_from(&updated.status);
        }
        Ok(updated)
    }

    async fn update_node_config_status(
        &self,
        name: &str,
        status: &NodeNetworkConfigStatus,
    ) -> Result<NodeNetworkConfig, StoreError> {
        let mut state = self.state();
        state.take_node_config_status_timeout(name)?;
        state.next_seq += 1;
        let version = state.next_seq.to_string();
        let stored = state
            .node_configs
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(format!("nodenetworkconfig/{name}")))?;
        stored.object.status = Some(status.clone());
        stored.object.metadata.resource_version = Some(version);
        Ok(stored.object.clone())
    }

    async fn delete_node_config(&self, name: &str) -> Result<(), StoreError> {
        self.state()
            .node_configs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("nodenetworkconfig/{name}")))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self
            .state()
            .nodes
            .values()
            .map(|s| s.object.clone())
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node, StoreError> {
        self.node(name)
            .ok_or_else(|| StoreError::NotFound(format!("node/{name}")))
    }

    async fn update_node(&self, node: &Node) -> Result<Node, StoreError> {
        let mut state = self.state();
        let State {
            next_seq, nodes, ..
        } = &mut *state;
        replace_existing(next_seq, nodes, node, "node")
    }

    async fn list_layer2s(&self) -> Result<Vec<Layer2NetworkConfiguration>, StoreError> {
        Ok(self.state().layer2s.values().cloned().collect())
    }

    async fn list_vrfs(&self) -> Result<Vec<VRFRouteConfiguration>, StoreError> {
        Ok(self.state().vrfs.values().cloned().collect())
    }

    async fn list_bgp_peerings(&self) -> Result<Vec<BGPPeering>, StoreError> {
        Ok(self.state().bgp_peerings.values().cloned().collect())
    }

    async fn list_routing_tables(&self) -> Result<Vec<RoutingTable>, StoreError> {
        Ok(self.state().routing_tables.values().cloned().collect())
    }
}
