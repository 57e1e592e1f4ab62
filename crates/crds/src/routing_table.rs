//! RoutingTable CRD

use crate::selector::NodeSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "network.microscaler.io",
    version = "v1alpha1",
    kind = "RoutingTable",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RoutingTableSpec {
    /// Kernel routing table ID
    pub table_id: u32,

    /// Nodes the table is created on (all nodes when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<NodeSelector>,
}
