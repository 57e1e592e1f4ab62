//! NodeNetworkConfig CRD
//!
//! The per-node projection of a NetworkConfigRevision, named after the node.
//! The operator writes the spec; the node agent writes the status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "network.microscaler.io",
    version = "v1alpha1",
    kind = "NodeNetworkConfig",
    shortname = "nnc",
    status = "NodeNetworkConfigStatus",
    printcolumn = r#"{"name":"Revision","type":"string","jsonPath":".spec.revision"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.configStatus"}"#,
    printcolumn = r#"{"name":"Last Update","type":"date","jsonPath":".status.lastUpdate"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkConfigSpec {
    /// Digest of the revision this config was projected from
    pub revision: String,

    /// Layer2 segments keyed by VLAN ID
    #[serde(default)]
    pub layer2s: BTreeMap<String, Layer2>,

    /// Fabric VRFs keyed by VRF name
    #[serde(default, rename = "fabricVRFs")]
    pub fabric_vrfs: BTreeMap<String, FabricVrf>,

    /// The cluster (default) VRF
    #[serde(default, rename = "clusterVRF", skip_serializing_if = "Option::is_none")]
    pub cluster_vrf: Option<Vrf>,

    /// Additional kernel routing tables
    #[serde(default)]
    pub routing_tables: Vec<NodeRoutingTable>,
}

/// A Layer2 segment on the node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Layer2 {
    /// VXLAN network identifier
    pub vni: u32,
    /// VLAN ID
    pub vlan: u16,
    /// MTU
    pub mtu: u16,
    /// Anycast gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irb: Option<Irb>,
}

/// Integrated routing and bridging interface of a segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Irb {
    /// VRF the gateway lives in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrf: Option<String>,
    /// Gateway addresses in CIDR notation
    pub ip_addresses: Vec<String>,
    /// Gateway MAC address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Vrf {
    #[serde(default, rename = "vrfImports")]
    pub vrf_imports: Vec<VrfImport>,
    #[serde(default, rename = "bgpPeers")]
    pub bgp_peers: Vec<BgpPeer>,
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
}

/// A fabric VRF with its EVPN parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FabricVrf {
    /// Imports, peers and static routes
    #[serde(flatten)]
    pub vrf: Vrf,
    /// L3 VNI
    pub vni: u32,
    /// EVPN route targets imported
    #[serde(default, rename = "evpnImportRouteTargets")]
    pub evpn_import_route_targets: Vec<String>,
    /// EVPN route targets exported
    #[serde(default, rename = "evpnExportRouteTargets")]
    pub evpn_export_route_targets: Vec<String>,
    /// Filter applied to routes exported into EVPN
    #[serde(default, rename = "evpnExportFilter")]
    pub evpn_export_filter: Filter,
}

/// Routes leaked into a VRF from another VRF.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VrfImport {
    /// Source VRF
    #[serde(rename = "fromVRF")]
    pub from_vrf: String,
    /// Filter applied to leaked routes
    pub filter: Filter,
}

/// Ordered route filter with a default verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default)]
    pub items: Vec<FilterItem>,
    pub default_action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FilterItem {
    pub prefix: PrefixMatcher,
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrefixMatcher {
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ge: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub le: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modify_route: Option<ModifyRouteAction>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Accept,
    #[default]
    Reject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModifyRouteAction {
    #[serde(default)]
    pub add_communities: Vec<String>,
    #[serde(default)]
    pub additive_communities: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaticRoute {
    pub prefix: String,
}

/// A BGP session accepting peers from a listen range.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BgpPeer {
    /// Network peers may connect from
    pub listen_range: String,
    /// Remote autonomous system number
    #[serde(rename = "remoteASN")]
    pub remote_asn: u32,
    /// BFD enabled
    #[serde(default, rename = "enableBFD")]
    pub enable_bfd: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive_time: Option<String>,
    /// IPv4 unicast policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<AddressFamily>,
    /// IPv6 unicast policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<AddressFamily>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddressFamily {
    pub import_filter: Filter,
    pub export_filter: Filter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_prefixes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRoutingTable {
    pub table_id: u32,
}

/// Provisioning state of a node's config, as reported by the node agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConfigStatus {
    /// Assigned but not picked up by the agent yet
    #[default]
    #[serde(rename = "")]
    Unknown,
    /// The agent is applying the config
    Provisioning,
    /// Applied and health-checked
    Provisioned,
    /// Apply or health check failed
    Invalid,
}

impl ConfigStatus {
    /// Wire representation of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigStatus::Unknown => "",
            ConfigStatus::Provisioning => "provisioning",
            ConfigStatus::Provisioned => "provisioned",
            ConfigStatus::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkConfigStatus {
    /// Current provisioning state
    #[serde(default)]
    pub config_status: ConfigStatus,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<chrono::DateTime<chrono::Utc>>,

    /// Last revision that reached `provisioned` or `invalid` on the node
    #[serde(default)]
    pub last_applied_revision: Option<String>,

    /// Error that invalidated the config
    #[serde(default)]
    pub error_message: Option<String>,
}

impl NodeNetworkConfig {
    /// Current provisioning state; `Unknown` when no status was written yet.
    #[must_use]
    pub fn config_status(&self) -> ConfigStatus {
        self.status
            .as_ref()
            .map(|s| s.config_status)
            .unwrap_or_default()
    }

    /// Last status change.
    #[must_use]
    pub fn last_update(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.status.as_ref().and_then(|s| s.last_update)
    }

    /// Revision digest this config was projected from.
    #[must_use]
    pub fn revision(&self) -> &str {
        &self.spec.revision
    }

    /// True when the status is missing or reports the outcome of another
    /// revision than the one in the spec.
    #[must_use]
    pub fn status_is_stale(&self) -> bool {
        let Some(status) = &self.status else {
            return true;
        };
        match status.config_status {
            ConfigStatus::Provisioned | ConfigStatus::Invalid => {
                status.last_applied_revision.as_deref() != Some(self.revision())
            }
            ConfigStatus::Unknown | ConfigStatus::Provisioning => false,
        }
    }

    /// Number of owner references on the object.
    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.metadata.owner_references.as_ref().map_or(0, Vec::len)
    }
}
