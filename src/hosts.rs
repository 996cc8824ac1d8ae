//! Hosts-file collaborator.
//!
//! Editing `/etc/hosts` needs elevation, so it is delegated to an external
//! helper program invoked as `<helper> add|remove <ip> <domain>`. Failures
//! are reported in the outcome, never raised.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// Result of one hosts operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostsOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl HostsOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait HostsEditor: Send + Sync {
    async fn add_host_entry(&self, ip: &str, domain: &str) -> HostsOutcome;

    async fn remove_host_entry(&self, ip: &str, domain: &str) -> HostsOutcome;
}

/// Runs the configured elevated helper.
#[derive(Debug, Clone)]
pub struct HelperHostsEditor {
    program: PathBuf,
    timeout: Duration,
}

impl HelperHostsEditor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(30),
        }
    }

    async fn run(&self, action: &str, ip: &str, domain: &str) -> HostsOutcome {
        let mut cmd = Command::new(&self.program);
        cmd.args([action, ip, domain]).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(helper = %self.program.display(), "Hosts helper failed to run: {}", e);
                return HostsOutcome::failed(e.to_string());
            }
            Err(_) => {
                tracing::warn!(helper = %self.program.display(), "Hosts helper timed out");
                return HostsOutcome::failed(format!("timed out after {:?}", self.timeout));
            }
        };

        if output.status.success() {
            tracing::info!(action, ip, domain, "Hosts entry updated");
            HostsOutcome::ok()
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let error = if stderr.is_empty() {
                format!("helper exited with {}", output.status)
            } else {
                stderr
            };
            tracing::warn!(action, domain, "Hosts helper reported failure: {}", error);
            HostsOutcome::failed(error)
        }
    }
}

#[async_trait]
impl HostsEditor for HelperHostsEditor {
    async fn add_host_entry(&self, ip: &str, domain: &str) -> HostsOutcome {
        self.run("add", ip, domain).await
    }

    async fn remove_host_entry(&self, ip: &str, domain: &str) -> HostsOutcome {
        self.run("remove", ip, domain).await
    }
}

/// Used when no helper is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHostsEditor;

#[async_trait]
impl HostsEditor for NoopHostsEditor {
    async fn add_host_entry(&self, _ip: &str, domain: &str) -> HostsOutcome {
        tracing::debug!(domain, "No hosts helper configured, skipping add");
        HostsOutcome::ok()
    }

    async fn remove_host_entry(&self, _ip: &str, domain: &str) -> HostsOutcome {
        tracing::debug!(domain, "No hosts helper configured, skipping remove");
        HostsOutcome::ok()
    }
}
