//! Main controller implementation.
//!
//! Builds the node reconciler from the agent configuration and drives it
//! from the config watch and a periodic resync.

use crate::applier::{CommandApplier, ConfigApplier, DryRunApplier};
use crate::cache::ConfigCache;
use crate::config::{AgentConfig, ApplierKind};
use crate::error::AgentError;
use crate::healthcheck::{HealthCheckConfig, HealthChecker, NodeHealthChecker};
use crate::reconciler::NodeReconciler;
use crate::watcher::{requeue, watch_node_config};
use crds::NodeNetworkConfig;
use debounce::Debouncer;
use futures::future::select_all;
use kube::{Api, Client};
use network_store::{KubeStore, NetworkStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const RESYNC_PERIOD: Duration = Duration::from_secs(10 * 60);
const API_TIMEOUT: Duration = Duration::from_secs(60);

/// Main controller for the node agent.
pub struct Controller {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<Result<(), AgentError>>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watcher.
    pub async fn new(config: AgentConfig) -> Result<Self, AgentError> {
        info!("Initializing network agent for node {}", config.node_name);

        let client = Client::try_default()
            .await
            .map_err(|e| AgentError::Store(StoreError::Kube(e)))?;
        let store: Arc<dyn NetworkStore> = Arc::new(KubeStore::new(client.clone(), API_TIMEOUT));

        let applier: Arc<dyn ConfigApplier> = match &config.applier {
            ApplierKind::Command(program) => Arc::new(CommandApplier::new(
                program.clone(),
                config.restore_on_failure,
            )),
            ApplierKind::DryRun => Arc::new(DryRunApplier),
        };
        let health: Arc<dyn HealthChecker> = Arc::new(NodeHealthChecker::new(
            Arc::clone(&store),
            config.node_name.clone(),
            HealthCheckConfig::load(&config.healthcheck_path, config.healthcheck_mandatory)?,
        ));
        let reconciler = Arc::new(
            NodeReconciler::new(
                store,
                config.node_name.clone(),
                applier,
                health,
                ConfigCache::new(config.cache_path.clone()),
            )
            .await?,
        );

        let cancel = CancellationToken::new();
        let debouncer = Debouncer::new(
            "node reconciler",
            config.debounce_time,
            cancel.clone(),
            move || {
                let reconciler = Arc::clone(&reconciler);
                async move { reconciler.reconcile().await.map_err(anyhow::Error::from) }
            },
        );

        let tasks = vec![
            tokio::spawn(watch_node_config(
                Api::all(client),
                config.node_name,
                debouncer.clone(),
            )),
            tokio::spawn(requeue(debouncer, RESYNC_PERIOD, cancel.clone())),
        ];

        Ok(Self { cancel, tasks })
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), AgentError> {
        info!("Network agent running");

        let result = tokio::select! {
            () = shutdown_signal() => {
                info!("Shutting down network agent");
                Ok(())
            }
            (result, _, _) = select_all(self.tasks) => match result {
                Ok(Ok(())) => Err(AgentError::Watch("background task exited".to_string())),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(AgentError::Watch(format!("background task panicked: {e}"))),
            },
        };
        self.cancel.cancel();
        if let Err(e) = &result {
            error!("Network agent stopped: {}", e);
        }
        result
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
