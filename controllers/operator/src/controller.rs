//! Main controller implementation.
//!
//! Wires the Revision Builder and the Rollout Controller to their
//! debouncers, watchers and periodic requeues.

use crate::config::{OperatorConfig, VrfTable};
use crate::config_reconciler::ConfigReconciler;
use crate::error::ControllerError;
use crate::revision_reconciler::RevisionReconciler;
use crate::watcher::{requeue, watch_resource};
use crds::{
    BGPPeering, Layer2NetworkConfiguration, NetworkConfigRevision, NodeNetworkConfig,
    RoutingTable, VRFRouteConfiguration,
};
use debounce::Debouncer;
use futures::future::select_all;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use network_store::{KubeStore, NetworkStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const BUILDER_REQUEUE: Duration = Duration::from_secs(10 * 60);
const ROLLOUT_REQUEUE: Duration = Duration::from_secs(60);

/// Main controller for the network operator.
pub struct Controller {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<Result<(), ControllerError>>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watchers.
    pub async fn new(config: OperatorConfig, vrf_table: VrfTable) -> Result<Self, ControllerError> {
        info!("Initializing network operator");

        let client = Client::try_default()
            .await
            .map_err(|e| ControllerError::Store(StoreError::Kube(e)))?;
        let store: Arc<dyn NetworkStore> =
            Arc::new(KubeStore::new(client.clone(), config.rollout.api_timeout));
        let cancel = CancellationToken::new();

        let builder = {
            let reconciler = Arc::new(ConfigReconciler::new(Arc::clone(&store)));
            Debouncer::new(
                "revision builder",
                config.debounce_time,
                cancel.clone(),
                move || {
                    let reconciler = Arc::clone(&reconciler);
                    async move { reconciler.reconcile().await.map_err(anyhow::Error::from) }
                },
            )
        };
        let rollout = {
            let reconciler = Arc::new(RevisionReconciler::new(
                Arc::clone(&store),
                config.rollout.clone(),
                vrf_table,
            ));
            Debouncer::new(
                "rollout controller",
                config.debounce_time,
                cancel.clone(),
                move || {
                    let reconciler = Arc::clone(&reconciler);
                    async move { reconciler.reconcile().await.map_err(anyhow::Error::from) }
                },
            )
        };

        let tasks = vec![
            tokio::spawn(watch_resource(
                Api::<Layer2NetworkConfiguration>::all(client.clone()),
                builder.clone(),
                "Layer2NetworkConfiguration",
            )),
            tokio::spawn(watch_resource(
                Api::<VRFRouteConfiguration>::all(client.clone()),
                builder.clone(),
                "VRFRouteConfiguration",
            )),
            tokio::spawn(watch_resource(
                Api::<BGPPeering>::all(client.clone()),
                builder.clone(),
                "BGPPeering",
            )),
            tokio::spawn(watch_resource(
                Api::<RoutingTable>::all(client.clone()),
                builder.clone(),
                "RoutingTable",
            )),
            tokio::spawn(watch_resource(
                Api::<NetworkConfigRevision>::all(client.clone()),
                rollout.clone(),
                "NetworkConfigRevision",
            )),
            tokio::spawn(watch_resource(
                Api::<NodeNetworkConfig>::all(client.clone()),
                rollout.clone(),
                "NodeNetworkConfig",
            )),
            tokio::spawn(watch_resource(
                Api::<Node>::all(client),
                rollout.clone(),
                "Node",
            )),
            tokio::spawn(requeue(builder, BUILDER_REQUEUE, cancel.clone())),
            tokio::spawn(requeue(rollout, ROLLOUT_REQUEUE, cancel.clone())),
        ];

        Ok(Self { cancel, tasks })
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Network operator running");

        let result = tokio::select! {
            () = shutdown_signal() => {
                info!("Shutting down network operator");
                Ok(())
            }
            (result, _, _) = select_all(self.tasks) => match result {
                Ok(Ok(())) => Err(ControllerError::Watch("background task exited".to_string())),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(ControllerError::Watch(format!("background task panicked: {e}"))),
            },
        };
        self.cancel.cancel();
        if let Err(e) = &result {
            error!("Network operator stopped: {}", e);
        }
        result
    }
}

/// Resolves on Ctrl-C or SIGTERM.
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
