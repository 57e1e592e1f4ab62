//! Network Operator
//!
//! Control plane of the progressive network config rollout:
//! - Revision Builder: aggregates Layer2NetworkConfiguration,
//!   VRFRouteConfiguration, BGPPeering and RoutingTable objects into one
//!   content-addressed NetworkConfigRevision
//! - Rollout Controller: projects the newest valid revision onto nodes one
//!   admission at a time and invalidates revisions that fail on any node

mod config;
mod config_reconciler;
mod controller;
mod error;
mod projection;
mod revision_reconciler;
mod watcher;

use crate::config::{OperatorConfig, VrfTable};
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting network operator");

    let config = OperatorConfig::from_env()?;
    let vrf_table = match &config.vrf_config_path {
        Some(path) => VrfTable::load(path)?,
        None => VrfTable::default(),
    };

    info!("Configuration:");
    info!("  Max updating: {}", config.rollout.max_updating);
    info!(
        "  API timeout: {}",
        humantime::format_duration(config.rollout.api_timeout)
    );
    info!(
        "  Config timeout: {}",
        humantime::format_duration(config.rollout.config_timeout)
    );
    info!(
        "  Preconfig timeout: {}",
        humantime::format_duration(config.rollout.preconfig_timeout)
    );
    info!(
        "  Excluded node roles: {}",
        config.rollout.excluded_node_roles.join(", ")
    );

    let controller = Controller::new(config, vrf_table).await?;
    controller.run().await?;

    Ok(())
}
