//! Per-node projection of a revision.
//!
//! Every entry of a revision carries an optional node selector; a node's
//! config contains only the entries selecting it, rendered into the
//! device-level shape the node agent applies.

mod bgp;
mod layer2;
mod vrf;

use crate::config::VrfTable;
use crds::{
    Action, ActionType, FilterItem, NetworkConfigRevision, NodeNetworkConfigSpec,
    NodeRoutingTable, PrefixAction, PrefixItem, PrefixMatcher, Vrf,
};
use std::collections::BTreeMap;
use thiserror::Error;

/// Name of the cluster VRF in VRF imports.
pub const CLUSTER_VRF: &str = "cluster";

/// Errors raised while projecting a revision onto a node.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Two selected Layer2 entries use the same VLAN
    #[error("duplicate Layer2 ID {0}")]
    DuplicateLayer2(u16),

    /// Neither the VRF entry nor the VRF table provide VNI and route target
    #[error("no VNI and route target known for VRF {0}")]
    MissingVrfParameters(String),

    /// A prefix or gateway address could not be parsed
    #[error("invalid CIDR {0}")]
    InvalidCidr(String),

    /// The peering VLAN of a BGP peering has no gateway on this node
    #[error("no IRB addresses found for peering VLAN {0}")]
    MissingPeeringVlan(String),

    /// A BGP peering refers to a VRF the node has no config for
    #[error("fabric VRF {0} not found")]
    UnknownFabricVrf(String),
}

/// Builds the spec of `revision` as seen by a node with `labels`.
pub fn build_node_config_spec(
    labels: Option<&BTreeMap<String, String>>,
    revision: &NetworkConfigRevision,
    vrf_table: &VrfTable,
) -> Result<NodeNetworkConfigSpec, ProjectionError> {
    let config = &revision.spec.config;
    let mut spec = NodeNetworkConfigSpec {
        revision: revision.spec.revision.clone(),
        layer2s: layer2::build_layer2s(labels, &config.layer2)?,
        cluster_vrf: Some(Vrf::default()),
        ..Default::default()
    };
    vrf::build_vrfs(labels, &config.vrf, vrf_table, &mut spec)?;
    bgp::build_bgp_peers(labels, config, &mut spec)?;
    spec.routing_tables = config
        .routing_table
        .iter()
        .filter(|t| crds::selector_matches(t.spec.node_selector.as_ref(), labels))
        .map(|t| NodeRoutingTable {
            table_id: t.spec.table_id,
        })
        .collect();
    Ok(spec)
}

fn filter_item(item: &PrefixItem) -> FilterItem {
    FilterItem {
        prefix: PrefixMatcher {
            prefix: item.cidr.clone(),
            ge: item.ge,
            le: item.le,
        },
        action: Action {
            kind: match item.action {
                PrefixAction::Permit => ActionType::Accept,
                PrefixAction::Deny => ActionType::Reject,
            },
            modify_route: None,
        },
    }
}

fn sorted_by_seq(items: &[PrefixItem]) -> Vec<&PrefixItem> {
    let mut sorted: Vec<&PrefixItem> = items.iter().collect();
    sorted.sort_by_key(|item| item.seq);
    sorted
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::VrfParameters;
    use crds::{
        BGPPeeringSpec, BGPRevision, Layer2NetworkConfigurationSpec, Layer2Revision, NodeSelector,
        PeeringVlan, RevisionConfig, RoutingTableRevision, RoutingTableSpec,
        VRFRouteConfigurationSpec, VRFRevision,
    };

    pub(crate) fn layer2_spec(id: u16, vni: u32) -> Layer2NetworkConfigurationSpec {
        Layer2NetworkConfigurationSpec {
            id,
            mtu: 1500,
            vni,
            anycast_mac: None,
            anycast_gateways: vec![],
            advertise_neighbors: false,
            create_macvlan_interface: false,
            neigh_suppression: None,
            vrf: None,
            node_selector: None,
        }
    }

    pub(crate) fn vrf_spec(vrf: &str, seq: i32) -> VRFRouteConfigurationSpec {
        VRFRouteConfigurationSpec {
            vrf: vrf.to_string(),
            vni: None,
            route_target: None,
            import: vec![],
            export: vec![],
            aggregate: vec![],
            community: None,
            seq,
            node_selector: None,
        }
    }

    pub(crate) fn prefix(cidr: &str, seq: i32, action: PrefixAction) -> PrefixItem {
        PrefixItem {
            cidr: cidr.to_string(),
            seq,
            ge: None,
            le: None,
            action,
        }
    }

    pub(crate) fn rack(rack: &str) -> NodeSelector {
        NodeSelector {
            match_labels: BTreeMap::from([("rack".to_string(), rack.to_string())]),
            ..Default::default()
        }
    }

    fn labels(rack: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("rack".to_string(), rack.to_string())])
    }

    fn table() -> VrfTable {
        VrfTable::from_entries([(
            "storage".to_string(),
            VrfParameters {
                vni: 2001,
                rt: "65000:2001".to_string(),
            },
        )])
    }

    fn revision(config: RevisionConfig) -> NetworkConfigRevision {
        NetworkConfigRevision::from_config(config).unwrap()
    }

    #[test]
    fn test_selectors_filter_entries() {
        let mut only_r2 = layer2_spec(200, 2000);
        only_r2.node_selector = Some(rack("r2"));
        let rev = revision(RevisionConfig {
            layer2: vec![
                Layer2Revision {
                    name: "everywhere".to_string(),
                    spec: layer2_spec(100, 1000),
                },
                Layer2Revision {
                    name: "r2-only".to_string(),
                    spec: only_r2,
                },
            ],
            routing_table: vec![RoutingTableRevision {
                name: "t".to_string(),
                spec: RoutingTableSpec {
                    table_id: 42,
                    node_selector: Some(rack("r1")),
                },
            }],
            ..Default::default()
        });

        let r1 = build_node_config_spec(Some(&labels("r1")), &rev, &table()).unwrap();
        assert_eq!(r1.revision, rev.spec.revision);
        assert_eq!(r1.layer2s.keys().collect::<Vec<_>>(), vec!["100"]);
        assert_eq!(r1.routing_tables, vec![NodeRoutingTable { table_id: 42 }]);

        let r2 = build_node_config_spec(Some(&labels("r2")), &rev, &table()).unwrap();
        assert_eq!(r2.layer2s.keys().collect::<Vec<_>>(), vec!["100", "200"]);
        assert!(r2.routing_tables.is_empty());
    }

    #[test]
    fn test_full_projection() {
        let mut peering = layer2_spec(300, 3000);
        peering.anycast_gateways = vec!["10.10.0.1/24".to_string(), "fd00::1/64".to_string()];
        peering.anycast_mac = Some("02:00:00:00:00:01".to_string());
        peering.vrf = Some("storage".to_string());

        let mut storage = vrf_spec("storage", 1);
        storage.export = vec![prefix("10.10.0.0/24", 1, PrefixAction::Permit)];
        storage.import = vec![prefix("192.168.0.0/16", 1, PrefixAction::Permit)];

        let rev = revision(RevisionConfig {
            layer2: vec![Layer2Revision {
                name: "peering".to_string(),
                spec: peering,
            }],
            vrf: vec![VRFRevision {
                name: "storage".to_string(),
                spec: storage,
            }],
            bgp: vec![BGPRevision {
                name: "workloads".to_string(),
                spec: BGPPeeringSpec {
                    peering_vlan: PeeringVlan {
                        name: "peering".to_string(),
                    },
                    remote_asn: 65100,
                    enable_bfd: true,
                    maximum_prefixes: Some(10),
                    hold_time: None,
                    keepalive_time: None,
                    import: vec![
                        prefix("10.20.0.0/16", 1, PrefixAction::Permit),
                        prefix("fd20::/48", 2, PrefixAction::Permit),
                    ],
                    export: vec![],
                    node_selector: None,
                },
            }],
            ..Default::default()
        });

        let spec = build_node_config_spec(None, &rev, &table()).unwrap();

        let segment = &spec.layer2s["300"];
        let irb = segment.irb.as_ref().unwrap();
        assert_eq!(irb.vrf.as_deref(), Some("storage"));
        assert_eq!(irb.ip_addresses.len(), 2);

        let fabric = &spec.fabric_vrfs["storage"];
        assert_eq!(fabric.vni, 2001);
        assert_eq!(fabric.vrf.bgp_peers.len(), 2);
        let v4 = &fabric.vrf.bgp_peers[0];
        assert_eq!(v4.listen_range, "10.10.0.0/24");
        let family = v4.ipv4.as_ref().unwrap();
        assert_eq!(family.import_filter.items.len(), 1);
        assert_eq!(family.import_filter.items[0].prefix.prefix, "10.20.0.0/16");
        assert_eq!(family.max_prefixes, Some(10));
        assert!(v4.ipv6.is_none());
        assert_eq!(fabric.vrf.bgp_peers[1].listen_range, "fd00::/64");

        let cluster = spec.cluster_vrf.as_ref().unwrap();
        assert_eq!(cluster.vrf_imports.len(), 1);
        assert_eq!(cluster.vrf_imports[0].from_vrf, "storage");
    }

    #[test]
    fn test_projection_is_deterministic() {
        let rev = revision(RevisionConfig {
            layer2: vec![Layer2Revision {
                name: "a".to_string(),
                spec: layer2_spec(100, 1000),
            }],
            vrf: vec![
                VRFRevision {
                    name: "one".to_string(),
                    spec: {
                        let mut s = vrf_spec("storage", 2);
                        s.import = vec![prefix("10.0.0.0/8", 1, PrefixAction::Permit)];
                        s
                    },
                },
                VRFRevision {
                    name: "two".to_string(),
                    spec: {
                        let mut s = vrf_spec("storage", 1);
                        s.vni = Some(5);
                        s.route_target = Some("1:5".to_string());
                        s.import = vec![prefix("172.16.0.0/12", 1, PrefixAction::Deny)];
                        s
                    },
                },
            ],
            ..Default::default()
        });

        let first = build_node_config_spec(None, &rev, &VrfTable::default()).unwrap();
        let second = build_node_config_spec(None, &rev, &VrfTable::default()).unwrap();
        assert_eq!(first, second);
        // Lowest seq creates the fabric VRF.
        assert_eq!(first.fabric_vrfs["storage"].vni, 5);
    }
}
