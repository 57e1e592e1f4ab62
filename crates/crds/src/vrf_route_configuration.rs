//! VRFRouteConfiguration CRD
//!
//! Route leaking between a fabric VRF and the cluster VRF.

use crate::selector::NodeSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "network.microscaler.io",
    version = "v1alpha1",
    kind = "VRFRouteConfiguration",
    shortname = "vrf",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VRFRouteConfigurationSpec {
    /// Fabric VRF name
    pub vrf: String,

    /// VNI of the VRF (looked up in the operator's VRF table when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vni: Option<u32>,

    /// EVPN route target of the VRF (looked up with the VNI when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_target: Option<String>,

    /// Prefixes imported from the fabric VRF into the cluster VRF
    #[serde(default)]
    pub import: Vec<PrefixItem>,

    /// Prefixes exported from the cluster VRF into the fabric VRF
    #[serde(default)]
    pub export: Vec<PrefixItem>,

    /// Aggregate prefixes announced into the fabric VRF
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregate: Vec<String>,

    /// BGP community attached to exported routes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community: Option<String>,

    /// Ordering among configurations of the same VRF
    #[serde(default)]
    pub seq: i32,

    /// Nodes this configuration applies to (all nodes when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<NodeSelector>,
}

/// A single prefix-list entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrefixItem {
    /// Matched prefix in CIDR notation
    pub cidr: String,

    /// Ordering within the list
    #[serde(default)]
    pub seq: i32,

    /// Minimum prefix length matched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ge: Option<u8>,

    /// Maximum prefix length matched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub le: Option<u8>,

    /// What happens to matching routes
    pub action: PrefixAction,
}

/// Prefix-list verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PrefixAction {
    /// Accept matching routes
    Permit,
    /// Reject matching routes
    Deny,
}
