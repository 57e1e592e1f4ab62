//! Config appliers.
//!
//! The agent never touches network devices itself; it hands the whole
//! NodeNetworkConfig to a [`ConfigApplier`].

use async_trait::async_trait;
use crds::NodeNetworkConfig;
use kube::ResourceExt;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors raised while applying a config.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The config could not be encoded for the applier
    #[error("serializing config: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The applier program could not be run
    #[error("running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The applier program rejected the config
    #[error("{program} exited with {status}: {stderr}")]
    Rejected {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Realizes a NodeNetworkConfig on the node.
#[async_trait]
pub trait ConfigApplier: Send + Sync {
    /// Applies `config`.
    async fn apply_config(&self, config: &NodeNetworkConfig) -> Result<(), ApplyError>;

    /// Whether a failed apply may leave a partial config behind, so the last
    /// good config has to be re-applied.
    fn restore_on_failure(&self) -> bool;
}

/// Pipes the config as JSON into an external program.
///
/// A non-zero exit may have applied part of the config.
#[derive(Debug, Clone)]
pub struct CommandApplier {
    program: PathBuf,
    restore_on_failure: bool,
}

impl CommandApplier {
    pub fn new(program: PathBuf, restore_on_failure: bool) -> Self {
        Self {
            program,
            restore_on_failure,
        }
    }

    fn io_error(&self, source: std::io::Error) -> ApplyError {
        ApplyError::Io {
            program: self.program.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl ConfigApplier for CommandApplier {
    async fn apply_config(&self, config: &NodeNetworkConfig) -> Result<(), ApplyError> {
        let payload = serde_json::to_vec(config)?;
        debug!(
            "Running {} for revision {}",
            self.program.display(),
            config.revision()
        );

        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.io_error(e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| self.io_error(e))?;
        if !output.status.success() {
            return Err(ApplyError::Rejected {
                program: self.program.display().to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn restore_on_failure(&self) -> bool {
        self.restore_on_failure
    }
}

/// Logs configs instead of applying them. Nothing is ever committed, so
/// there is nothing to restore.
#[derive(Debug, Clone, Default)]
pub struct DryRunApplier;

#[async_trait]
impl ConfigApplier for DryRunApplier {
    async fn apply_config(&self, config: &NodeNetworkConfig) -> Result<(), ApplyError> {
        info!(
            "Dry run: would apply revision {} to node {} ({} layer2, {} fabric VRFs)",
            config.revision(),
            config.name_any(),
            config.spec.layer2s.len(),
            config.spec.fabric_vrfs.len()
        );
        Ok(())
    }

    fn restore_on_failure(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::NodeNetworkConfigSpec;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn config() -> NodeNetworkConfig {
        NodeNetworkConfig::new(
            "worker-1",
            NodeNetworkConfigSpec {
                revision: "abc".to_string(),
                ..Default::default()
            },
        )
    }

    fn script(body: &str) -> tempfile::TempPath {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let path = file.into_temp_path();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_command_receives_config_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("received.json");
        let program = script(&format!("cat > {}", out.display()));

        CommandApplier::new(program.to_path_buf(), true)
            .apply_config(&config())
            .await
            .unwrap();

        let received: NodeNetworkConfig =
            serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(received.spec.revision, "abc");
    }

    #[tokio::test]
    async fn test_command_failure_is_reported() {
        let program = script("cat > /dev/null\necho 'bridge br100 missing' >&2\nexit 3");

        let err = CommandApplier::new(program.to_path_buf(), true)
            .apply_config(&config())
            .await
            .unwrap_err();

        assert!(matches!(err, ApplyError::Rejected { .. }));
        assert!(err.to_string().contains("bridge br100 missing"));
    }

    #[tokio::test]
    async fn test_dry_run_never_restores() {
        let applier = DryRunApplier;
        applier.apply_config(&config()).await.unwrap();
        assert!(!applier.restore_on_failure());
    }
}
