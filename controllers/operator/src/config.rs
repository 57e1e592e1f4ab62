//! Operator configuration.
//!
//! Settings come from environment variables; durations use humantime syntax
//! ("60s", "2m").

use crate::error::ControllerError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MAX_UPDATING: u32 = 1;
const DEFAULT_API_TIMEOUT: &str = "60s";
const DEFAULT_CONFIG_TIMEOUT: &str = "2m";
const DEFAULT_PRECONFIG_TIMEOUT: &str = "10m";
const DEFAULT_DEBOUNCE_TIME: &str = "1s";
const DEFAULT_EXCLUDED_NODE_ROLES: &str = "node-role.kubernetes.io/control-plane";

/// Rollout tuning knobs.
#[derive(Debug, Clone)]
pub struct RolloutSettings {
    /// Admission bound on nodes concurrently applying the target revision
    pub max_updating: u32,
    /// Deadline for a whole rollout tick and for each deploy attempt
    pub api_timeout: Duration,
    /// How long a node may stay `provisioning`
    pub config_timeout: Duration,
    /// How long a node may take to pick up a newly assigned config
    pub preconfig_timeout: Duration,
    /// Nodes carrying any of these labels never receive configs
    pub excluded_node_roles: Vec<String>,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            max_updating: DEFAULT_MAX_UPDATING,
            api_timeout: Duration::from_secs(60),
            config_timeout: Duration::from_secs(120),
            preconfig_timeout: Duration::from_secs(600),
            excluded_node_roles: vec![DEFAULT_EXCLUDED_NODE_ROLES.to_string()],
        }
    }
}

/// Full operator configuration.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub rollout: RolloutSettings,
    pub debounce_time: Duration,
    pub vrf_config_path: Option<PathBuf>,
}

fn duration(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<Duration, ControllerError> {
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    humantime::parse_duration(&raw)
        .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw}: {e}")))
}

impl OperatorConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let max_updating = match lookup("MAX_UPDATING") {
            Some(raw) => raw.parse::<u32>().map_err(|e| {
                ControllerError::InvalidConfig(format!("MAX_UPDATING={raw}: {e}"))
            })?,
            None => DEFAULT_MAX_UPDATING,
        };
        let excluded_node_roles = lookup("EXCLUDED_NODE_ROLES")
            .unwrap_or_else(|| DEFAULT_EXCLUDED_NODE_ROLES.to_string())
            .split(',')
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .map(ToString::to_string)
            .collect();

        Ok(Self {
            rollout: RolloutSettings {
                max_updating,
                api_timeout: duration(&lookup, "API_TIMEOUT", DEFAULT_API_TIMEOUT)?,
                config_timeout: duration(&lookup, "CONFIG_TIMEOUT", DEFAULT_CONFIG_TIMEOUT)?,
                preconfig_timeout: duration(
                    &lookup,
                    "PRECONFIG_TIMEOUT",
                    DEFAULT_PRECONFIG_TIMEOUT,
                )?,
                excluded_node_roles,
            },
            debounce_time: duration(&lookup, "DEBOUNCE_TIME", DEFAULT_DEBOUNCE_TIME)?,
            vrf_config_path: lookup("VRF_CONFIG_PATH").map(PathBuf::from),
        })
    }
}

/// VNI and route target of a fabric VRF.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct VrfParameters {
    pub vni: u32,
    pub rt: String,
}

/// Fallback VNI/route-target table for VRFs that do not carry their own.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrfTable {
    #[serde(default)]
    vrf_config: BTreeMap<String, VrfParameters>,
}

impl VrfTable {
    /// Loads the table from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ControllerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::InvalidConfig(format!("reading {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&raw).map_err(|e| {
            ControllerError::InvalidConfig(format!("parsing {}: {e}", path.display()))
        })
    }

    /// Builds a table from explicit entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, VrfParameters)>) -> Self {
        Self {
            vrf_config: entries.into_iter().collect(),
        }
    }

    /// Parameters of `vrf`, if known.
    pub fn get(&self, vrf: &str) -> Option<&VrfParameters> {
        self.vrf_config.get(vrf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.rollout.max_updating, 1);
        assert_eq!(config.rollout.api_timeout, Duration::from_secs(60));
        assert_eq!(config.rollout.config_timeout, Duration::from_secs(120));
        assert_eq!(config.rollout.preconfig_timeout, Duration::from_secs(600));
        assert_eq!(config.debounce_time, Duration::from_secs(1));
        assert_eq!(
            config.rollout.excluded_node_roles,
            vec!["node-role.kubernetes.io/control-plane".to_string()]
        );
        assert!(config.vrf_config_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = OperatorConfig::from_lookup(lookup(&[
            ("MAX_UPDATING", "3"),
            ("CONFIG_TIMEOUT", "5m"),
            ("EXCLUDED_NODE_ROLES", "a, b,"),
            ("VRF_CONFIG_PATH", "/etc/vrfs.yaml"),
        ]))
        .unwrap();
        assert_eq!(config.rollout.max_updating, 3);
        assert_eq!(config.rollout.config_timeout, Duration::from_secs(300));
        assert_eq!(
            config.rollout.excluded_node_roles,
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(config.vrf_config_path, Some(PathBuf::from("/etc/vrfs.yaml")));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            OperatorConfig::from_lookup(lookup(&[("MAX_UPDATING", "many")])),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            OperatorConfig::from_lookup(lookup(&[("API_TIMEOUT", "soon")])),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_vrf_table_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "vrfConfig:\n  storage:\n    vni: 2001\n    rt: \"65000:2001\"\n"
        )
        .unwrap();

        let table = VrfTable::load(file.path()).unwrap();
        assert_eq!(
            table.get("storage"),
            Some(&VrfParameters {
                vni: 2001,
                rt: "65000:2001".to_string()
            })
        );
        assert!(table.get("missing").is_none());
    }
}
