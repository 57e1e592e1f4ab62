//! Network Agent
//!
//! Runs on every node. Applies the node's NodeNetworkConfig through the
//! configured applier, health-checks the result, reports the outcome on the
//! config's status and restores the last good config when anything fails.

mod applier;
mod cache;
mod config;
mod controller;
mod error;
mod healthcheck;
mod reconciler;
mod watcher;

use crate::config::{AgentConfig, ApplierKind};
use crate::error::AgentError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting network agent");

    let config = AgentConfig::from_env()?;

    info!("Configuration:");
    info!("  Node: {}", config.node_name);
    info!("  Config cache: {}", config.cache_path.display());
    info!("  Health check config: {}", config.healthcheck_path.display());
    match &config.applier {
        ApplierKind::Command(program) => info!("  Applier: {}", program.display()),
        ApplierKind::DryRun => info!("  Applier: dry run"),
    }
    info!("  Restore on failure: {}", config.restore_on_failure);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
