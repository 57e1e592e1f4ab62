//! Layer2NetworkConfiguration CRD
//!
//! Declares a VXLAN-backed Layer2 segment (VLAN + VNI) with an optional
//! anycast gateway (IRB).

use crate::selector::NodeSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "network.microscaler.io",
    version = "v1alpha1",
    kind = "Layer2NetworkConfiguration",
    shortname = "layer2",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct Layer2NetworkConfigurationSpec {
    /// VLAN ID of the segment on the node
    pub id: u16,

    /// MTU of the segment
    pub mtu: u16,

    /// VXLAN network identifier
    pub vni: u32,

    /// MAC address used by the anycast gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anycast_mac: Option<String>,

    /// Anycast gateway addresses in CIDR notation (e.g. "10.0.0.1/24")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anycast_gateways: Vec<String>,

    /// Advertise neighbor (host) routes into the fabric
    #[serde(default)]
    pub advertise_neighbors: bool,

    /// Create a macvlan interface on top of the bridge
    #[serde(default, rename = "createMacVLANInterface")]
    pub create_macvlan_interface: bool,

    /// Enable ARP/ND suppression on the VXLAN device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neigh_suppression: Option<bool>,

    /// VRF the anycast gateway is attached to (cluster VRF when empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrf: Option<String>,

    /// Nodes this segment is configured on (all nodes when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<NodeSelector>,
}
