//! Watches this node's NodeNetworkConfig.

use crate::error::AgentError;
use crds::NodeNetworkConfig;
use debounce::Debouncer;
use futures::StreamExt;
use kube::Api;
use kube_runtime::{WatchStreamExt, watcher};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Triggers `debouncer` whenever the config named `node_name` changes.
pub async fn watch_node_config(
    api: Api<NodeNetworkConfig>,
    node_name: String,
    debouncer: Debouncer,
) -> Result<(), AgentError> {
    info!("Starting NodeNetworkConfig watcher for node {}", node_name);

    let config = watcher::Config::default().fields(&format!("metadata.name={node_name}"));
    let mut stream = watcher(api, config).default_backoff().boxed();

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(config)) => {
                debug!("NodeNetworkConfig applied: revision {}", config.revision());
                debouncer.debounce();
            }
            Ok(watcher::Event::Delete(_)) => {
                info!("NodeNetworkConfig for node {} deleted", node_name);
                debouncer.debounce();
            }
            Ok(watcher::Event::Init | watcher::Event::InitApply(_)) => {}
            Ok(watcher::Event::InitDone) => {
                info!("NodeNetworkConfig watcher initialization complete");
                debouncer.debounce();
            }
            Err(e) => warn!("NodeNetworkConfig watcher stream error: {}", e),
        }
    }

    Err(AgentError::Watch(
        "NodeNetworkConfig watch stream ended".to_string(),
    ))
}

/// Triggers `debouncer` every `period` until `cancel` fires.
pub async fn requeue(
    debouncer: Debouncer,
    period: Duration,
    cancel: CancellationToken,
) -> Result<(), AgentError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            _ = interval.tick() => debouncer.debounce(),
        }
    }
}
