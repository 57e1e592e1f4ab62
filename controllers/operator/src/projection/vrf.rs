use super::{filter_item, sorted_by_seq, ProjectionError, CLUSTER_VRF};
use crate::config::VrfTable;
use crds::{
    selector_matches, Action, FabricVrf, Filter, ModifyRouteAction, NodeNetworkConfigSpec,
    StaticRoute, VRFRevision, Vrf, VrfImport,
};
use std::collections::BTreeMap;

/// Fills the fabric VRFs and the cluster VRF imports of `spec`.
pub(super) fn build_vrfs(
    labels: Option<&BTreeMap<String, String>>,
    entries: &[VRFRevision],
    vrf_table: &VrfTable,
    spec: &mut NodeNetworkConfigSpec,
) -> Result<(), ProjectionError> {
    let mut sorted: Vec<&VRFRevision> = entries.iter().collect();
    sorted.sort_by_key(|vrf| vrf.spec.seq);

    let mut cluster_imports: BTreeMap<String, VrfImport> = BTreeMap::new();
    for entry in sorted {
        if !selector_matches(entry.spec.node_selector.as_ref(), labels) {
            continue;
        }
        let name = &entry.spec.vrf;
        if !spec.fabric_vrfs.contains_key(name) {
            spec.fabric_vrfs
                .insert(name.clone(), new_fabric_vrf(entry, vrf_table)?);
        }
        if let Some(fabric) = spec.fabric_vrfs.get_mut(name) {
            add_entry(fabric, entry);
        }
        add_cluster_imports(entry, &mut cluster_imports);
    }

    spec.cluster_vrf
        .get_or_insert_with(Vrf::default)
        .vrf_imports
        .extend(cluster_imports.into_values());
    Ok(())
}

fn new_fabric_vrf(entry: &VRFRevision, vrf_table: &VrfTable) -> Result<FabricVrf, ProjectionError> {
    let (vni, rt) = match (&entry.spec.vni, &entry.spec.route_target) {
        (Some(vni), Some(rt)) => (*vni, rt.clone()),
        _ => {
            let params = vrf_table
                .get(&entry.spec.vrf)
                .ok_or_else(|| ProjectionError::MissingVrfParameters(entry.spec.vrf.clone()))?;
            (params.vni, params.rt.clone())
        }
    };
    let route_targets: Vec<String> = if rt.is_empty() { vec![] } else { vec![rt] };
    Ok(FabricVrf {
        vrf: Vrf {
            vrf_imports: vec![VrfImport {
                from_vrf: CLUSTER_VRF.to_string(),
                filter: Filter::default(),
            }],
            ..Default::default()
        },
        vni,
        evpn_import_route_targets: route_targets.clone(),
        evpn_export_route_targets: route_targets,
        evpn_export_filter: Filter::default(),
    })
}

/// Aggregates become static routes; exports go into the EVPN export filter
/// and are mirrored into the import from the cluster VRF.
fn add_entry(fabric: &mut FabricVrf, entry: &VRFRevision) {
    fabric.vrf.static_routes.extend(
        entry
            .spec
            .aggregate
            .iter()
            .map(|prefix| StaticRoute {
                prefix: prefix.clone(),
            }),
    );

    for export in sorted_by_seq(&entry.spec.export) {
        let item = filter_item(export);
        let mut import_item = item.clone();
        if let Some(community) = &entry.spec.community {
            import_item.action = Action {
                kind: item.action.kind,
                modify_route: Some(ModifyRouteAction {
                    add_communities: vec![community.clone()],
                    additive_communities: true,
                }),
            };
        }
        fabric.evpn_export_filter.items.push(item);
        if let Some(from_cluster) = fabric.vrf.vrf_imports.first_mut() {
            from_cluster.filter.items.push(import_item);
        }
    }
}

fn add_cluster_imports(entry: &VRFRevision, cluster_imports: &mut BTreeMap<String, VrfImport>) {
    for import in sorted_by_seq(&entry.spec.import) {
        cluster_imports
            .entry(entry.spec.vrf.clone())
            .or_insert_with(|| VrfImport {
                from_vrf: entry.spec.vrf.clone(),
                filter: Filter::default(),
            })
            .filter
            .items
            .push(filter_item(import));
    }
}
