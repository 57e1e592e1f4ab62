//! NetworkConfigRevision CRD
//!
//! A content-addressed snapshot of all network intent in the cluster. The
//! object name is derived from the digest of its spec, so identical intent
//! always maps onto the same object.

use crate::bgp_peering::BGPPeeringSpec;
use crate::layer2_network_configuration::Layer2NetworkConfigurationSpec;
use crate::routing_table::RoutingTableSpec;
use crate::vrf_route_configuration::VRFRouteConfigurationSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of digest hex characters used as the object name.
pub const REVISION_NAME_LENGTH: usize = 10;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "network.microscaler.io",
    version = "v1alpha1",
    kind = "NetworkConfigRevision",
    shortname = "ncr",
    status = "NetworkConfigRevisionStatus",
    printcolumn = r#"{"name":"Invalid","type":"boolean","jsonPath":".status.isInvalid"}"#,
    printcolumn = r#"{"name":"Queued","type":"integer","jsonPath":".status.queued"}"#,
    printcolumn = r#"{"name":"Ongoing","type":"integer","jsonPath":".status.ongoing"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Total","type":"integer","jsonPath":".status.total"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfigRevisionSpec {
    /// Aggregated intent
    pub config: RevisionConfig,

    /// Hex-encoded SHA-256 digest of this spec, computed with this field empty
    #[serde(default)]
    pub revision: String,
}

/// All intent objects, keyed by their source object's name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionConfig {
    /// Layer2 segments
    #[serde(default)]
    pub layer2: Vec<Layer2Revision>,

    /// VRF route configurations
    #[serde(default)]
    pub vrf: Vec<VRFRevision>,

    /// BGP peerings
    #[serde(default)]
    pub bgp: Vec<BGPRevision>,

    /// Routing tables
    #[serde(default)]
    pub routing_table: Vec<RoutingTableRevision>,
}

/// A Layer2NetworkConfiguration as captured in a revision.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Layer2Revision {
    /// Source object name
    pub name: String,

    /// Source object spec
    #[serde(flatten)]
    pub spec: Layer2NetworkConfigurationSpec,
}

/// A VRFRouteConfiguration as captured in a revision.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct VRFRevision {
    /// Source object name
    pub name: String,

    /// Source object spec
    #[serde(flatten)]
    pub spec: VRFRouteConfigurationSpec,
}

/// A BGPPeering as captured in a revision.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct BGPRevision {
    /// Source object name
    pub name: String,

    /// Source object spec
    #[serde(flatten)]
    pub spec: BGPPeeringSpec,
}

/// A RoutingTable as captured in a revision.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RoutingTableRevision {
    /// Source object name
    pub name: String,

    /// Source object spec
    #[serde(flatten)]
    pub spec: RoutingTableSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfigRevisionStatus {
    /// Set once any node failed this revision; never cleared
    #[serde(default)]
    pub is_invalid: bool,

    /// Nodes with a provisioned config for this revision
    #[serde(default)]
    pub ready: u32,

    /// Nodes still applying this revision
    #[serde(default)]
    pub ongoing: u32,

    /// Nodes waiting to be admitted to this revision
    #[serde(default)]
    pub queued: u32,

    /// Nodes eligible for network configs
    #[serde(default)]
    pub total: u32,

    /// First node that failed this revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<String>,

    /// Failure reported by `failed_node`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_message: Option<String>,

    /// When the first failure was observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Errors raised while computing a revision.
#[derive(Debug, thiserror::Error)]
pub enum RevisionError {
    /// The spec could not be serialized for hashing
    #[error("failed to serialize revision spec: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RevisionConfig {
    /// Sorts every entry list by source object name.
    pub fn sort_entries(&mut self) {
        self.layer2.sort_by(|a, b| a.name.cmp(&b.name));
        self.vrf.sort_by(|a, b| a.name.cmp(&b.name));
        self.bgp.sort_by(|a, b| a.name.cmp(&b.name));
        self.routing_table.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

impl NetworkConfigRevision {
    /// Builds the revision for an aggregated config.
    ///
    /// Entries are sorted first, so the result does not depend on the order
    /// in which intent objects were listed.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec cannot be serialized.
    pub fn from_config(mut config: RevisionConfig) -> Result<Self, RevisionError> {
        config.sort_entries();
        let mut spec = NetworkConfigRevisionSpec {
            config,
            revision: String::new(),
        };
        let data = serde_json::to_vec(&spec)?;
        let digest = hex::encode(Sha256::digest(&data));
        let name = digest[..REVISION_NAME_LENGTH].to_string();
        spec.revision = digest;
        Ok(NetworkConfigRevision::new(&name, spec))
    }

    /// Full digest of this revision.
    #[must_use]
    pub fn revision(&self) -> &str {
        &self.spec.revision
    }

    /// Whether the revision has been marked invalid.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.is_invalid)
    }
}
