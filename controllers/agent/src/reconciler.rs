//! Node reconciler.
//!
//! Applies this node's NodeNetworkConfig, health-checks the result and
//! rolls back to the last good config when either step fails. Status
//! transitions: `"" -> provisioning -> provisioned | invalid`.

use crate::applier::ConfigApplier;
use crate::cache::ConfigCache;
use crate::error::AgentError;
use crate::healthcheck::HealthChecker;
use chrono::Utc;
use crds::{ConfigStatus, NodeNetworkConfig, NodeNetworkConfigStatus};
use kube::ResourceExt;
use network_store::NetworkStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Reconciles the NodeNetworkConfig named after this node.
pub struct NodeReconciler {
    store: Arc<dyn NetworkStore>,
    node_name: String,
    applier: Arc<dyn ConfigApplier>,
    health: Arc<dyn HealthChecker>,
    cache: ConfigCache,
    /// Last config that completed a cycle successfully
    last_good: Mutex<Option<NodeNetworkConfig>>,
}

impl NodeReconciler {
    /// Creates the reconciler, seeding the last good config from `cache`.
    pub async fn new(
        store: Arc<dyn NetworkStore>,
        node_name: String,
        applier: Arc<dyn ConfigApplier>,
        health: Arc<dyn HealthChecker>,
        cache: ConfigCache,
    ) -> Result<Self, AgentError> {
        let last_good = cache.load().await?;
        match &last_good {
            Some(config) => info!(
                "Loaded cached NodeNetworkConfig revision {} from {}",
                config.revision(),
                cache.path().display()
            ),
            None => info!("No cached NodeNetworkConfig at {}", cache.path().display()),
        }
        Ok(Self {
            store,
            node_name,
            applier,
            health,
            cache,
            last_good: Mutex::new(last_good),
        })
    }

    /// Runs one reconcile cycle.
    pub async fn reconcile(&self) -> Result<(), AgentError> {
        let mut last_good = self.last_good.lock().await;

        let config = match self.store.get_node_config(&self.node_name).await {
            Ok(config) => config,
            Err(e) if e.is_not_found() => {
                debug!("No NodeNetworkConfig for node {}", self.node_name);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let revision = config.revision().to_string();

        if last_good
            .as_ref()
            .is_some_and(|good| good.revision() == revision)
        {
            self.cache.store(&config).await?;
            if config.config_status() != ConfigStatus::Provisioned {
                self.set_status(&config, ConfigStatus::Provisioned, None)
                    .await?;
            }
            *last_good = Some(config);
            return self.ensure_taints_removed().await;
        }

        if config.config_status() == ConfigStatus::Invalid
            && config
                .status
                .as_ref()
                .and_then(|s| s.last_applied_revision.as_deref())
                == Some(revision.as_str())
        {
            info!(
                "Skipping invalid NodeNetworkConfig {} (revision {})",
                config.name_any(),
                revision
            );
            return Ok(());
        }

        self.process(&config, last_good.as_ref()).await?;

        self.cache.store(&config).await?;
        *last_good = Some(config);
        self.ensure_taints_removed().await
    }

    async fn process(
        &self,
        config: &NodeNetworkConfig,
        last_good: Option<&NodeNetworkConfig>,
    ) -> Result<(), AgentError> {
        self.set_status(config, ConfigStatus::Provisioning, None)
            .await?;

        if let Err(e) = self.applier.apply_config(config).await {
            error!("Applying revision {} failed: {}", config.revision(), e);
            self.set_status(config, ConfigStatus::Invalid, Some(e.to_string()))
                .await?;
            if self.applier.restore_on_failure() {
                self.restore(last_good).await?;
            }
            return Err(e.into());
        }

        if let Err(e) = self.check_health().await {
            error!(
                "Health check after revision {} failed: {}",
                config.revision(),
                e
            );
            self.set_status(config, ConfigStatus::Invalid, Some(e.to_string()))
                .await?;
            self.restore(last_good).await?;
            return Err(e.into());
        }

        self.set_status(config, ConfigStatus::Provisioned, None)
            .await
    }

    async fn check_health(&self) -> Result<(), AgentError> {
        self.health.check_interfaces().await?;
        self.health.check_reachability().await?;
        self.health.check_api_server().await?;
        Ok(())
    }

    async fn ensure_taints_removed(&self) -> Result<(), AgentError> {
        if !self.health.taints_removed() {
            self.health.remove_taints().await?;
        }
        Ok(())
    }

    /// Re-applies the last good config, if there is one.
    async fn restore(&self, last_good: Option<&NodeNetworkConfig>) -> Result<(), AgentError> {
        let Some(previous) = last_good else {
            warn!("No previous NodeNetworkConfig to restore");
            return Ok(());
        };
        info!("Restoring NodeNetworkConfig revision {}", previous.revision());
        self.applier.apply_config(previous).await?;
        info!("Restored NodeNetworkConfig revision {}", previous.revision());
        Ok(())
    }

    async fn set_status(
        &self,
        config: &NodeNetworkConfig,
        status: ConfigStatus,
        error_message: Option<String>,
    ) -> Result<(), AgentError> {
        info!(
            "Setting NodeNetworkConfig {} status to {}",
            config.name_any(),
            status
        );
        let last_applied_revision = match status {
            ConfigStatus::Provisioned | ConfigStatus::Invalid => Some(config.revision().to_string()),
            ConfigStatus::Unknown | ConfigStatus::Provisioning => config
                .status
                .as_ref()
                .and_then(|s| s.last_applied_revision.clone()),
        };
        self.store
            .update_node_config_status(
                &config.name_any(),
                &NodeNetworkConfigStatus {
                    config_status: status,
                    last_update: Some(Utc::now()),
                    last_applied_revision,
                    error_message,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;
