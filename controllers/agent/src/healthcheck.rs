//! Post-apply health checks.
//!
//! After a config is applied the node must still have its uplinks up, reach
//! the configured endpoints and talk to the API server. The first successful
//! provisioning also lifts the uninitialized taint so workloads get
//! scheduled.

use async_trait::async_trait;
use network_store::{NetworkStore, StoreError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// Taint that keeps workloads off the node until its network is provisioned.
pub const TAINT_KEY: &str = "node.cloudprovider.kubernetes.io/uninitialized";

const DEFAULT_TCP_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_RETRIES: u32 = 3;
const SYS_CLASS_NET: &str = "/sys/class/net";

/// Errors raised by health checks.
#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("interfaces not up: {}", .0.join(", "))]
    Interfaces(Vec<String>),

    #[error("{target} unreachable: {source}")]
    Unreachable {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("API server check failed: {0}")]
    ApiServer(#[source] StoreError),

    #[error("removing taint failed: {0}")]
    Taint(#[source] StoreError),

    #[error("health check config: {0}")]
    Config(String),
}

/// Health checks run by the node reconciler, in this order.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check_interfaces(&self) -> Result<(), HealthCheckError>;
    async fn check_reachability(&self) -> Result<(), HealthCheckError>;
    async fn check_api_server(&self) -> Result<(), HealthCheckError>;
    fn taints_removed(&self) -> bool;
    async fn remove_taints(&self) -> Result<(), HealthCheckError>;
}

/// Endpoint that must accept (or actively refuse) TCP connections.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReachabilityItem {
    pub host: String,
    pub port: u16,
}

/// Health check settings, read from YAML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub reachability: Vec<ReachabilityItem>,
    /// TCP connect timeout; humantime or plain seconds
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub retries: Option<u32>,
}

impl HealthCheckConfig {
    /// Loads the config from `path`. A missing file yields an empty config
    /// unless `mandatory` is set.
    pub fn load(path: &Path, mandatory: bool) -> Result<Self, HealthCheckError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if !mandatory && e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "No health check config at {}, checking nothing",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(HealthCheckError::Config(format!(
                    "reading {}: {e}",
                    path.display()
                )));
            }
        };
        serde_yaml::from_str(&raw)
            .map_err(|e| HealthCheckError::Config(format!("parsing {}: {e}", path.display())))
    }

    fn tcp_timeout(&self) -> Duration {
        let Some(raw) = self.timeout.as_deref() else {
            return DEFAULT_TCP_TIMEOUT;
        };
        if let Ok(timeout) = humantime::parse_duration(raw) {
            return timeout;
        }
        if let Ok(seconds) = raw.parse::<u64>() {
            return Duration::from_secs(seconds);
        }
        warn!(
            "Invalid health check timeout {:?}, using {}",
            raw,
            humantime::format_duration(DEFAULT_TCP_TIMEOUT)
        );
        DEFAULT_TCP_TIMEOUT
    }
}

/// [`HealthChecker`] for the local node.
pub struct NodeHealthChecker {
    store: Arc<dyn NetworkStore>,
    node_name: String,
    config: HealthCheckConfig,
    tcp_timeout: Duration,
    retries: u32,
    sys_class_net: PathBuf,
    taints_removed: AtomicBool,
}

impl NodeHealthChecker {
    pub fn new(store: Arc<dyn NetworkStore>, node_name: String, config: HealthCheckConfig) -> Self {
        Self::with_sys_class_net(store, node_name, config, PathBuf::from(SYS_CLASS_NET))
    }

    /// Reads interface state below `sys_class_net` instead of `/sys/class/net`.
    pub fn with_sys_class_net(
        store: Arc<dyn NetworkStore>,
        node_name: String,
        config: HealthCheckConfig,
        sys_class_net: PathBuf,
    ) -> Self {
        let tcp_timeout = config.tcp_timeout();
        let retries = config.retries.filter(|r| *r > 0).unwrap_or(DEFAULT_RETRIES);
        Self {
            store,
            node_name,
            config,
            tcp_timeout,
            retries,
            sys_class_net,
            taints_removed: AtomicBool::new(false),
        }
    }

    async fn interface_up(&self, name: &str) -> Result<(), String> {
        let path = self.sys_class_net.join(name).join("operstate");
        match tokio::fs::read_to_string(&path).await {
            Ok(state) if state.trim() == "up" => Ok(()),
            Ok(state) => Err(format!("{name} is {}", state.trim())),
            Err(e) => Err(format!("{name}: {e}")),
        }
    }

    async fn reach(&self, item: &ReachabilityItem) -> Result<(), HealthCheckError> {
        let target = format!("{}:{}", item.host, item.port);
        let mut last_error = None;
        for attempt in 1..=self.retries {
            let result = tokio::time::timeout(
                self.tcp_timeout,
                TcpStream::connect((item.host.as_str(), item.port)),
            )
            .await;
            let err = match result {
                Ok(Ok(_stream)) => return Ok(()),
                // The host is up, it just does not accept this port.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(()),
                Ok(Err(e)) => e,
                Err(_elapsed) => std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no answer within {}", humantime::format_duration(self.tcp_timeout)),
                ),
            };
            debug!("Attempt {} to reach {} failed: {}", attempt, target, err);
            last_error = Some(err);
        }
        Err(HealthCheckError::Unreachable {
            target,
            source: last_error
                .unwrap_or_else(|| std::io::Error::other("no connection attempt made")),
        })
    }
}

#[async_trait]
impl HealthChecker for NodeHealthChecker {
    async fn check_interfaces(&self) -> Result<(), HealthCheckError> {
        let mut down = Vec::new();
        for name in &self.config.interfaces {
            if let Err(problem) = self.interface_up(name).await {
                error!("Problem with network interface {}", problem);
                down.push(problem);
            }
        }
        if down.is_empty() {
            Ok(())
        } else {
            Err(HealthCheckError::Interfaces(down))
        }
    }

    async fn check_reachability(&self) -> Result<(), HealthCheckError> {
        for item in &self.config.reachability {
            self.reach(item).await?;
        }
        Ok(())
    }

    async fn check_api_server(&self) -> Result<(), HealthCheckError> {
        self.store
            .get_node(&self.node_name)
            .await
            .map(|_| ())
            .map_err(HealthCheckError::ApiServer)
    }

    fn taints_removed(&self) -> bool {
        self.taints_removed.load(Ordering::Acquire)
    }

    async fn remove_taints(&self) -> Result<(), HealthCheckError> {
        let mut node = self
            .store
            .get_node(&self.node_name)
            .await
            .map_err(HealthCheckError::Taint)?;
        let taints = node.spec.as_mut().and_then(|spec| spec.taints.as_mut());
        if let Some(taints) = taints
            && taints.iter().any(|t| t.key == TAINT_KEY)
        {
            taints.retain(|t| t.key != TAINT_KEY);
            self.store
                .update_node(&node)
                .await
                .map_err(HealthCheckError::Taint)?;
            info!("Removed taint {} from node {}", TAINT_KEY, self.node_name);
        }
        self.taints_removed.store(true, Ordering::Release);
        Ok(())
    }
}
