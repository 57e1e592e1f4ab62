use super::ProjectionError;
use crds::{selector_matches, Irb, Layer2, Layer2Revision};
use std::collections::BTreeMap;

/// Selected Layer2 entries keyed by their VLAN ID.
pub(super) fn build_layer2s(
    labels: Option<&BTreeMap<String, String>>,
    entries: &[Layer2Revision],
) -> Result<BTreeMap<String, Layer2>, ProjectionError> {
    let mut sorted: Vec<&Layer2Revision> = entries.iter().collect();
    sorted.sort_by_key(|l2| l2.spec.id);

    let mut layer2s = BTreeMap::new();
    for l2 in sorted {
        if !selector_matches(l2.spec.node_selector.as_ref(), labels) {
            continue;
        }
        let key = l2.spec.id.to_string();
        if layer2s.contains_key(&key) {
            return Err(ProjectionError::DuplicateLayer2(l2.spec.id));
        }
        let irb = (!l2.spec.anycast_gateways.is_empty()).then(|| Irb {
            vrf: l2.spec.vrf.clone(),
            ip_addresses: l2.spec.anycast_gateways.clone(),
            mac_address: l2.spec.anycast_mac.clone(),
        });
        layer2s.insert(
            key,
            Layer2 {
                vni: l2.spec.vni,
                vlan: l2.spec.id,
                mtu: l2.spec.mtu,
                irb,
            },
        );
    }
    Ok(layer2s)
}
