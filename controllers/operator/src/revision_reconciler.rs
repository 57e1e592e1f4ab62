//! Rollout controller.
//!
//! Picks the newest revision that is not known to be bad, admits at most one
//! more node into it per pass, aggregates per-node outcomes back onto every
//! revision and garbage-collects configs and revisions nobody needs anymore.

use crate::config::{RolloutSettings, VrfTable};
use crate::error::ControllerError;
use crate::projection::build_node_config_spec;
use chrono::{DateTime, Utc};
use crds::{ConfigStatus, NetworkConfigRevision, NodeNetworkConfig, NodeNetworkConfigStatus};
use k8s_openapi::api::core::v1::Node;
use kube::{Resource, ResourceExt};
use network_store::{NetworkStore, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Number of owners a live NodeNetworkConfig has (its Node and its revision).
const OWNER_REFERENCES: usize = 2;

/// Attempts per deploy; only timeouts are retried.
const DEPLOY_ATTEMPTS: u32 = 3;

/// Per-revision tally of node outcomes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Counters {
    ready: u32,
    ongoing: u32,
    invalid: u32,
    /// Configs projected from the revision, whatever their state
    references: u32,
    first_failure: Option<(String, String)>,
}

/// Drives revisions onto nodes.
pub struct RevisionReconciler {
    store: Arc<dyn NetworkStore>,
    settings: RolloutSettings,
    vrf_table: VrfTable,
}

impl RevisionReconciler {
    /// Creates a new rollout controller.
    pub fn new(store: Arc<dyn NetworkStore>, settings: RolloutSettings, vrf_table: VrfTable) -> Self {
        Self {
            store,
            settings,
            vrf_table,
        }
    }

    /// Runs one rollout pass, bounded by the API timeout.
    pub async fn reconcile(&self) -> Result<(), ControllerError> {
        match tokio::time::timeout(self.settings.api_timeout, self.reconcile_inner()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ControllerError::Store(StoreError::Timeout(
                "rollout pass".to_string(),
            ))),
        }
    }

    async fn reconcile_inner(&self) -> Result<(), ControllerError> {
        let mut revisions = self.store.list_revisions().await?;
        let nodes = self.list_nodes().await?;
        let configs = self.list_configs().await?;
        let now = Utc::now();
        let total = u32::try_from(nodes.len()).unwrap_or(u32::MAX);
        let mut references = BTreeMap::new();

        for revision in &mut revisions {
            let counters = self.count(revision, &configs, now);
            let name = revision.name_any();
            references.insert(name.clone(), counters.references);
            let status = revision.status.get_or_insert_with(Default::default);
            status.ready = counters.ready;
            status.ongoing = counters.ongoing;
            status.total = total;
            status.queued = 0;
            if counters.invalid > 0 {
                if !status.is_invalid {
                    warn!(
                        "Invalidating NetworkConfigRevision {}: {} node(s) failed",
                        name, counters.invalid
                    );
                }
                status.is_invalid = true;
                if status.failed_node.is_none()
                    && let Some((node, message)) = counters.first_failure
                {
                    status.failed_node = Some(node);
                    status.failed_message = Some(message);
                    status.failed_at = Some(now);
                }
            }
        }

        let to_deploy = revisions.iter().position(|r| !r.is_invalid());
        match to_deploy {
            Some(index) => {
                let queued = self.admit(&revisions[index], &nodes, &configs).await?;
                if let Some(status) = revisions[index].status.as_mut() {
                    status.queued = queued;
                }
            }
            None => error!("No valid NetworkConfigRevision to deploy"),
        }

        for revision in &revisions {
            let status = revision.status.clone().unwrap_or_default();
            self.store
                .update_revision_status(&revision.name_any(), &status)
                .await?;
        }

        self.cleanup(&revisions, &references).await
    }

    /// Lists nodes eligible for configs, sorted by name.
    async fn list_nodes(&self) -> Result<Vec<Node>, ControllerError> {
        let mut nodes: Vec<Node> = self
            .store
            .list_nodes()
            .await?
            .into_iter()
            .filter(|node| is_ready(node) && !self.is_excluded(node))
            .collect();
        nodes.sort_by_key(ResourceExt::name_any);
        Ok(nodes)
    }

    fn is_excluded(&self, node: &Node) -> bool {
        let labels = node.labels();
        self.settings
            .excluded_node_roles
            .iter()
            .any(|role| labels.contains_key(role))
    }

    /// Lists configs keyed by node name, deleting orphaned ones.
    async fn list_configs(&self) -> Result<BTreeMap<String, NodeNetworkConfig>, ControllerError> {
        let mut configs = BTreeMap::new();
        for config in self.store.list_node_configs().await? {
            let name = config.name_any();
            if config.owner_count() < OWNER_REFERENCES {
                info!("Deleting orphaned NodeNetworkConfig {}", name);
                match self.store.delete_node_config(&name).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                continue;
            }
            configs.insert(name, config);
        }
        Ok(configs)
    }

    fn count(
        &self,
        revision: &NetworkConfigRevision,
        configs: &BTreeMap<String, NodeNetworkConfig>,
        now: DateTime<Utc>,
    ) -> Counters {
        let mut counters = Counters::default();
        for (node, config) in configs {
            if config.revision() != revision.revision() {
                continue;
            }
            counters.references += 1;
            if config.status_is_stale() {
                counters.ongoing += 1;
                continue;
            }
            let status = config.config_status();
            let failure = match status {
                ConfigStatus::Provisioned => {
                    counters.ready += 1;
                    None
                }
                ConfigStatus::Invalid => Some(
                    config
                        .status
                        .as_ref()
                        .and_then(|s| s.error_message.clone())
                        .unwrap_or_else(|| "configuration failed".to_string()),
                ),
                ConfigStatus::Unknown | ConfigStatus::Provisioning => {
                    counters.ongoing += 1;
                    let timeout = if status == ConfigStatus::Unknown {
                        self.settings.preconfig_timeout
                    } else {
                        self.settings.config_timeout
                    };
                    timed_out(config.last_update(), timeout, now).then(|| {
                        let state = if status == ConfigStatus::Unknown {
                            "pending"
                        } else {
                            "provisioning"
                        };
                        format!(
                            "timed out after {} in {state} state",
                            humantime::format_duration(timeout)
                        )
                    })
                }
            };
            if let Some(message) = failure {
                counters.invalid += 1;
                if counters.first_failure.is_none() {
                    counters.first_failure = Some((node.clone(), message));
                }
            }
        }
        counters
    }

    /// Deploys `revision` to at most one node; returns how many nodes are
    /// still not on it.
    async fn admit(
        &self,
        revision: &NetworkConfigRevision,
        nodes: &[Node],
        configs: &BTreeMap<String, NodeNetworkConfig>,
    ) -> Result<u32, ControllerError> {
        for config in configs.values() {
            if config.revision() == revision.revision() && config.status_is_stale() {
                self.reset_status(config).await?;
            }
        }

        let pending: Vec<&Node> = nodes
            .iter()
            .filter(|node| {
                configs
                    .get(&node.name_any())
                    .is_none_or(|c| c.revision() != revision.revision())
            })
            .collect();
        let queued = u32::try_from(pending.len()).unwrap_or(u32::MAX);
        let ongoing = revision.status.as_ref().map_or(0, |s| s.ongoing);

        if let Some(node) = pending.first() {
            if ongoing < self.settings.max_updating {
                self.deploy(node, revision).await?;
            } else {
                debug!(
                    "NetworkConfigRevision {}: {} node(s) updating, waiting",
                    revision.name_any(),
                    ongoing
                );
            }
        }
        Ok(queued)
    }

    async fn deploy(&self, node: &Node, revision: &NetworkConfigRevision) -> Result<(), ControllerError> {
        let name = node.name_any();
        let mut attempt = 1;
        loop {
            let result =
                match tokio::time::timeout(self.settings.api_timeout, self.deploy_once(node, revision))
                    .await
                {
                    Ok(result) => result,
                    Err(_elapsed) => Err(ControllerError::Store(StoreError::Timeout(format!(
                        "deploying to {name}"
                    )))),
                };
            match result {
                Err(e) if e.is_timeout() && attempt < DEPLOY_ATTEMPTS => {
                    warn!("Deploying to node {} timed out (attempt {}): {}", name, attempt, e);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn deploy_once(
        &self,
        node: &Node,
        revision: &NetworkConfigRevision,
    ) -> Result<(), ControllerError> {
        let name = node.name_any();
        let spec = build_node_config_spec(node.metadata.labels.as_ref(), revision, &self.vrf_table)?;
        let owners = vec![
            node.owner_ref(&()).ok_or_else(|| {
                ControllerError::InvalidConfig(format!("node {name} has no uid"))
            })?,
            revision.owner_ref(&()).ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "NetworkConfigRevision {} has no uid",
                    revision.name_any()
                ))
            })?,
        ];

        match self.store.get_node_config(&name).await {
            Ok(current) if current.revision() == revision.revision() => {
                debug!("Node {} already has revision {}", name, revision.name_any());
                if current.status_is_stale() {
                    self.reset_status(&current).await?;
                }
                return Ok(());
            }
            Ok(current) => {
                // The status must be pending before the spec changes.
                let mut current = self.reset_status(&current).await?;
                current.spec = spec;
                current.metadata.owner_references = Some(owners);
                self.store.update_node_config(&current).await?;
            }
            Err(e) if e.is_not_found() => {
                let mut config = NodeNetworkConfig::new(&name, spec);
                config.metadata.owner_references = Some(owners);
                let created = self.store.create_node_config(&config).await?;
                self.reset_status(&created).await?;
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Deployed NetworkConfigRevision {} to node {}",
            revision.name_any(),
            name
        );
        Ok(())
    }

    /// Marks `config` as pending, keeping the last revision the node applied.
    async fn reset_status(
        &self,
        config: &NodeNetworkConfig,
    ) -> Result<NodeNetworkConfig, ControllerError> {
        let last_applied_revision = config
            .status
            .as_ref()
            .and_then(|s| s.last_applied_revision.clone());
        let updated = self
            .store
            .update_node_config_status(
                &config.name_any(),
                &NodeNetworkConfigStatus {
                    config_status: ConfigStatus::Unknown,
                    last_update: Some(Utc::now()),
                    last_applied_revision,
                    error_message: None,
                },
            )
            .await?;
        Ok(updated)
    }

    /// Once every eligible node runs the newest revision, drops older
    /// revisions no config refers to anymore.
    async fn cleanup(
        &self,
        revisions: &[NetworkConfigRevision],
        references: &BTreeMap<String, u32>,
    ) -> Result<(), ControllerError> {
        let Some((newest, older)) = revisions.split_first() else {
            return Ok(());
        };
        let status = newest.status.clone().unwrap_or_default();
        if status.is_invalid || status.queued > 0 || status.ongoing > 0 {
            return Ok(());
        }
        for revision in older {
            let name = revision.name_any();
            if references.get(&name).copied().unwrap_or_default() > 0 {
                continue;
            }
            info!("Deleting unused NetworkConfigRevision {}", name);
            match self.store.delete_revision(&name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// A missing timestamp never times out.
fn timed_out(last_update: Option<DateTime<Utc>>, timeout: Duration, now: DateTime<Utc>) -> bool {
    let Some(last_update) = last_update else {
        return false;
    };
    let Ok(timeout) = chrono::Duration::from_std(timeout) else {
        return false;
    };
    now - last_update > timeout
}

#[cfg(test)]
#[path = "revision_reconciler_test.rs"]
mod revision_reconciler_test;
