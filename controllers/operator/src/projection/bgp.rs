use super::{filter_item, sorted_by_seq, ProjectionError};
use crds::{
    selector_matches, AddressFamily, BGPRevision, BgpPeer, Filter, NodeNetworkConfigSpec,
    PrefixItem, RevisionConfig, Vrf,
};
use ipnet::IpNet;
use std::collections::BTreeMap;

/// Attaches one BGP peer per gateway network of each peering VLAN.
pub(super) fn build_bgp_peers(
    labels: Option<&BTreeMap<String, String>>,
    config: &RevisionConfig,
    spec: &mut NodeNetworkConfigSpec,
) -> Result<(), ProjectionError> {
    let mut sorted: Vec<&BGPRevision> = config.bgp.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    for peering in sorted {
        if !selector_matches(peering.spec.node_selector.as_ref(), labels) {
            continue;
        }
        let vlan_name = &peering.spec.peering_vlan.name;
        let vlan = config
            .layer2
            .iter()
            .find(|l2| {
                &l2.name == vlan_name && selector_matches(l2.spec.node_selector.as_ref(), labels)
            })
            .filter(|l2| !l2.spec.anycast_gateways.is_empty())
            .ok_or_else(|| ProjectionError::MissingPeeringVlan(vlan_name.clone()))?;

        for gateway in &vlan.spec.anycast_gateways {
            let network = parse_cidr(gateway)?.trunc();
            let peer = build_peer(network, peering)?;
            match &vlan.spec.vrf {
                Some(vrf) => spec
                    .fabric_vrfs
                    .get_mut(vrf)
                    .ok_or_else(|| ProjectionError::UnknownFabricVrf(vrf.clone()))?
                    .vrf
                    .bgp_peers
                    .push(peer),
                None => spec
                    .cluster_vrf
                    .get_or_insert_with(Vrf::default)
                    .bgp_peers
                    .push(peer),
            }
        }
    }
    Ok(())
}

fn parse_cidr(cidr: &str) -> Result<IpNet, ProjectionError> {
    cidr.parse::<IpNet>()
        .map_err(|e| ProjectionError::InvalidCidr(format!("{cidr}: {e}")))
}

fn build_peer(listen_range: IpNet, peering: &BGPRevision) -> Result<BgpPeer, ProjectionError> {
    let ipv4 = matches!(listen_range, IpNet::V4(_));
    let family = AddressFamily {
        import_filter: family_filter(&peering.spec.import, ipv4)?,
        export_filter: family_filter(&peering.spec.export, ipv4)?,
        max_prefixes: peering.spec.maximum_prefixes,
    };
    let (ipv4, ipv6) = if ipv4 {
        (Some(family), None)
    } else {
        (None, Some(family))
    };
    Ok(BgpPeer {
        listen_range: listen_range.to_string(),
        remote_asn: peering.spec.remote_asn,
        enable_bfd: peering.spec.enable_bfd,
        hold_time: peering.spec.hold_time.clone(),
        keepalive_time: peering.spec.keepalive_time.clone(),
        ipv4,
        ipv6,
    })
}

/// Default-reject filter holding the items of one address family.
fn family_filter(items: &[PrefixItem], ipv4: bool) -> Result<Filter, ProjectionError> {
    let mut filter = Filter::default();
    for item in sorted_by_seq(items) {
        if matches!(parse_cidr(&item.cidr)?, IpNet::V4(_)) == ipv4 {
            filter.items.push(filter_item(item));
        }
    }
    Ok(filter)
}
