//! Revision builder.
//!
//! Aggregates every intent object into one content-addressed
//! `NetworkConfigRevision` and creates it unless an equivalent revision is
//! already current or known to be bad.

use crate::error::ControllerError;
use crds::{
    BGPRevision, Layer2NetworkConfiguration, Layer2Revision, NetworkConfigRevision,
    RevisionConfig, RoutingTableRevision, VRFRevision,
};
use kube::ResourceExt;
use network_store::NetworkStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds and publishes revisions from intent objects.
pub struct ConfigReconciler {
    store: Arc<dyn NetworkStore>,
}

impl ConfigReconciler {
    /// Creates a new revision builder.
    pub fn new(store: Arc<dyn NetworkStore>) -> Self {
        Self { store }
    }

    /// Runs one build pass.
    pub async fn reconcile(&self) -> Result<(), ControllerError> {
        let config = self.fetch_config().await?;
        let candidate = NetworkConfigRevision::from_config(config)?;
        let name = candidate.name_any();

        let revisions = self.store.list_revisions().await?;
        if let Some(reason) = skip_reason(&revisions, &candidate) {
            debug!("Skipping NetworkConfigRevision {}: {}", name, reason);
            return Ok(());
        }

        self.create_revision(&candidate).await?;
        info!("Created NetworkConfigRevision {}", name);
        Ok(())
    }

    async fn fetch_config(&self) -> Result<RevisionConfig, ControllerError> {
        let layer2s = self.store.list_layer2s().await?;
        check_layer2_duplicates(&layer2s)?;

        let layer2 = layer2s
            .into_iter()
            .map(|l2| Layer2Revision {
                name: l2.name_any(),
                spec: l2.spec,
            })
            .collect();
        let vrf = self
            .store
            .list_vrfs()
            .await?
            .into_iter()
            .map(|vrf| VRFRevision {
                name: vrf.name_any(),
                spec: vrf.spec,
            })
            .collect();
        let bgp = self
            .store
            .list_bgp_peerings()
            .await?
            .into_iter()
            .map(|bgp| BGPRevision {
                name: bgp.name_any(),
                spec: bgp.spec,
            })
            .collect();
        let routing_table = self
            .store
            .list_routing_tables()
            .await?
            .into_iter()
            .map(|table| RoutingTableRevision {
                name: table.name_any(),
                spec: table.spec,
            })
            .collect();

        Ok(RevisionConfig {
            layer2,
            vrf,
            bgp,
            routing_table,
        })
    }

    /// Creates `revision`, replacing a stale object of the same name.
    async fn create_revision(&self, revision: &NetworkConfigRevision) -> Result<(), ControllerError> {
        match self.store.create_revision(revision).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => {
                let name = revision.name_any();
                warn!("NetworkConfigRevision {} already exists, recreating it", name);
                match self.store.delete_revision(&name).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                self.store.create_revision(revision).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Why `candidate` must not be created, if it must not.
///
/// `revisions` is sorted newest first.
fn skip_reason(
    revisions: &[NetworkConfigRevision],
    candidate: &NetworkConfigRevision,
) -> Option<&'static str> {
    let digest = candidate.revision();
    if revisions.first().is_some_and(|r| r.revision() == digest) {
        return Some("same as the newest revision");
    }
    if revisions
        .iter()
        .find(|r| !r.is_invalid())
        .is_some_and(|r| r.revision() == digest)
    {
        return Some("same as the newest valid revision");
    }
    if revisions
        .iter()
        .any(|r| r.is_invalid() && r.revision() == digest)
    {
        return Some("revision is known to be invalid");
    }
    None
}

fn check_layer2_duplicates(layer2s: &[Layer2NetworkConfiguration]) -> Result<(), ControllerError> {
    let mut seen: BTreeMap<u32, String> = BTreeMap::new();
    for l2 in layer2s {
        let name = l2.name_any();
        if let Some(other) = seen.insert(l2.spec.vni, name.clone()) {
            return Err(ControllerError::InvalidConfig(format!(
                "duplicate Layer2 VNI {}: {} and {}",
                l2.spec.vni, other, name
            )));
        }
    }
    Ok(())
}
