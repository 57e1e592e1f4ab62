//! Agent configuration from environment variables.

use crate::error::AgentError;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/opt/network-operator/current-config.json";
const DEFAULT_HEALTHCHECK_PATH: &str = "/opt/network-operator/net-healthcheck-config.yaml";
const DEFAULT_DEBOUNCE_TIME: &str = "1s";

/// How configs reach the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplierKind {
    /// Pipe the config into an external program
    Command(PathBuf),
    /// Log the config without touching the node
    DryRun,
}

/// Full agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub node_name: String,
    pub cache_path: PathBuf,
    pub healthcheck_path: PathBuf,
    /// The health check file must exist (its path was set explicitly)
    pub healthcheck_mandatory: bool,
    pub applier: ApplierKind,
    pub restore_on_failure: bool,
    pub debounce_time: Duration,
}

impl AgentConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AgentError> {
        let node_name = lookup("NODE_NAME")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                AgentError::InvalidConfig("NODE_NAME environment variable is required".to_string())
            })?;

        let healthcheck_override = lookup("NET_HEALTHCHECK_CONFIG").filter(|p| !p.is_empty());
        let healthcheck_mandatory = healthcheck_override.is_some();
        let healthcheck_path = PathBuf::from(
            healthcheck_override.unwrap_or_else(|| DEFAULT_HEALTHCHECK_PATH.to_string()),
        );

        let applier = match lookup("AGENT_APPLIER").as_deref().unwrap_or("command") {
            "command" => ApplierKind::Command(PathBuf::from(lookup("APPLIER_COMMAND").ok_or_else(
                || {
                    AgentError::InvalidConfig(
                        "APPLIER_COMMAND is required for the command applier".to_string(),
                    )
                },
            )?)),
            "dry-run" => ApplierKind::DryRun,
            other => {
                return Err(AgentError::InvalidConfig(format!(
                    "AGENT_APPLIER={other}: expected command or dry-run"
                )));
            }
        };

        let restore_on_failure = match lookup("RESTORE_ON_RECONCILE_FAILURE") {
            Some(raw) => raw.parse::<bool>().map_err(|e| {
                AgentError::InvalidConfig(format!("RESTORE_ON_RECONCILE_FAILURE={raw}: {e}"))
            })?,
            None => true,
        };

        let raw = lookup("DEBOUNCE_TIME").unwrap_or_else(|| DEFAULT_DEBOUNCE_TIME.to_string());
        let debounce_time = humantime::parse_duration(&raw)
            .map_err(|e| AgentError::InvalidConfig(format!("DEBOUNCE_TIME={raw}: {e}")))?;

        Ok(Self {
            node_name,
            cache_path: PathBuf::from(
                lookup("NODE_NETWORK_CONFIG_PATH").unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
            ),
            healthcheck_path,
            healthcheck_mandatory,
            applier,
            restore_on_failure,
            debounce_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("NODE_NAME", "worker-1"),
            ("APPLIER_COMMAND", "/usr/local/bin/apply-network"),
        ]))
        .unwrap();
        assert_eq!(config.node_name, "worker-1");
        assert_eq!(config.cache_path, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(config.healthcheck_path, PathBuf::from(DEFAULT_HEALTHCHECK_PATH));
        assert!(!config.healthcheck_mandatory);
        assert_eq!(
            config.applier,
            ApplierKind::Command(PathBuf::from("/usr/local/bin/apply-network"))
        );
        assert!(config.restore_on_failure);
        assert_eq!(config.debounce_time, Duration::from_secs(1));
    }

    #[test]
    fn test_node_name_is_required() {
        assert!(matches!(
            AgentConfig::from_lookup(lookup(&[("AGENT_APPLIER", "dry-run")])),
            Err(AgentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_explicit_healthcheck_path_is_mandatory() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("NODE_NAME", "worker-1"),
            ("AGENT_APPLIER", "dry-run"),
            ("NET_HEALTHCHECK_CONFIG", "/etc/hc.yaml"),
            ("RESTORE_ON_RECONCILE_FAILURE", "false"),
        ]))
        .unwrap();
        assert!(config.healthcheck_mandatory);
        assert_eq!(config.healthcheck_path, PathBuf::from("/etc/hc.yaml"));
        assert_eq!(config.applier, ApplierKind::DryRun);
        assert!(!config.restore_on_failure);
    }

    #[test]
    fn test_unknown_applier_is_rejected() {
        assert!(matches!(
            AgentConfig::from_lookup(lookup(&[
                ("NODE_NAME", "worker-1"),
                ("AGENT_APPLIER", "netconf"),
            ])),
            Err(AgentError::InvalidConfig(_))
        ));
    }
}
