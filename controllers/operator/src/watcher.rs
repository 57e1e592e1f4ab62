//! Kubernetes resource watchers.
//!
//! Watch events carry no work of their own: any change to a watched kind
//! just pokes the debouncer of the loop that depends on it.

use crate::error::ControllerError;
use debounce::Debouncer;
use futures::StreamExt;
use kube::Api;
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watches every object of `api` and triggers `debouncer` on changes.
///
/// Stream errors are retried with the watcher's default backoff; the
/// function only returns if the stream ends.
pub async fn watch_resource<K>(
    api: Api<K>,
    debouncer: Debouncer,
    kind: &'static str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    info!("Starting {} watcher", kind);

    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(obj) | watcher::Event::Delete(obj)) => {
                debug!(
                    "{} changed: {}",
                    kind,
                    obj.meta().name.as_deref().unwrap_or("<unknown>")
                );
                debouncer.debounce();
            }
            Ok(watcher::Event::Init | watcher::Event::InitApply(_)) => {}
            Ok(watcher::Event::InitDone) => {
                info!("{} watcher initialization complete", kind);
                debouncer.debounce();
            }
            Err(e) => warn!("{} watcher stream error: {}", kind, e),
        }
    }

    Err(ControllerError::Watch(format!("{kind} watch stream ended")))
}

/// Triggers `debouncer` every `period` until `cancel` fires.
pub async fn requeue(
    debouncer: Debouncer,
    period: Duration,
    cancel: CancellationToken,
) -> Result<(), ControllerError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            _ = interval.tick() => debouncer.debounce(),
        }
    }
}
