//! BGPPeering CRD
//!
//! BGP sessions towards workloads attached to a peering VLAN.

use crate::selector::NodeSelector;
use crate::vrf_route_configuration::PrefixItem;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "network.microscaler.io",
    version = "v1alpha1",
    kind = "BGPPeering",
    shortname = "bgp",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BGPPeeringSpec {
    /// Layer2 segment the peers live on
    pub peering_vlan: PeeringVlan,

    /// Remote autonomous system number
    #[serde(rename = "remoteASN")]
    pub remote_asn: u32,

    /// Enable BFD on the session
    #[serde(default, rename = "enableBFD")]
    pub enable_bfd: bool,

    /// Maximum number of prefixes accepted from the peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_prefixes: Option<u32>,

    /// BGP hold time (e.g. "90s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_time: Option<String>,

    /// BGP keepalive interval (e.g. "30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive_time: Option<String>,

    /// Prefixes accepted from the peer
    #[serde(default)]
    pub import: Vec<PrefixItem>,

    /// Prefixes announced to the peer
    #[serde(default)]
    pub export: Vec<PrefixItem>,

    /// Nodes the session is configured on (all nodes when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<NodeSelector>,
}

/// Reference to a Layer2NetworkConfiguration by name.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct PeeringVlan {
    /// Name of the Layer2NetworkConfiguration
    pub name: String,
}
