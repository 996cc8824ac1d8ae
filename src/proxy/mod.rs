//! Edge reverse-proxy synchronization.
//!
//! The proxy configuration is a single generated artifact. Every sync
//! regenerates it in full from the project registry, copies it into the
//! proxy container and asks the proxy to reload gracefully. Nothing is ever
//! patched, so no lock is needed around it.

mod render;

pub use render::{EndpointTarget, RegisteredEndpoint, endpoints, render_config};

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use crate::config::ProxyConfig;
use crate::lifecycle::ContainerManager;
use crate::registry::ProjectRegistry;

/// Result of one [`ProxySynchronizer::sync_endpoints`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Proxy not running (or engine unreachable). Nothing was written.
    Skipped { reason: String },
    /// Configuration written and reload requested.
    Applied { config: String },
    Failed { error: String },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }
}

pub struct ProxySynchronizer {
    lifecycle: Arc<ContainerManager>,
    projects: Arc<dyn ProjectRegistry>,
    config: ProxyConfig,
    /// Background syncs that have not been waited for yet.
    pending: Mutex<JoinSet<()>>,
}

impl ProxySynchronizer {
    pub fn new(
        lifecycle: Arc<ContainerManager>,
        projects: Arc<dyn ProjectRegistry>,
        config: ProxyConfig,
    ) -> Self {
        Self {
            lifecycle,
            projects,
            config,
            pending: Mutex::new(JoinSet::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Render the configuration the next sync would apply.
    pub async fn render(&self) -> Result<String, crate::error::RegistryError> {
        let projects = self.projects.list_projects().await?;
        Ok(render_config(&projects, &self.config))
    }

    /// Regenerate and apply the proxy configuration.
    ///
    /// A proxy that is not running is a successful no-op, so entity
    /// lifecycle operations never depend on the proxy being up.
    pub async fn sync_endpoints(&self) -> SyncOutcome {
        let proxy = &self.config.container_name;

        let state = match self.lifecycle.get_container_state(proxy).await {
            Ok(state) => state,
            Err(e) if e.is_unavailable() => {
                tracing::debug!(proxy = %proxy, "Engine unavailable, skipping proxy sync");
                return SyncOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
            Err(e) => {
                return SyncOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };
        if !state.running {
            tracing::info!(proxy = %proxy, state = %state.state, "Proxy not running, skipping sync");
            return SyncOutcome::Skipped {
                reason: format!("proxy container '{}' is {}", proxy, state.state),
            };
        }

        let config = match self.render().await {
            Ok(config) => config,
            Err(e) => {
                return SyncOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        if let Err(e) = self.apply(&config).await {
            return SyncOutcome::Failed { error: e };
        }

        tracing::info!(proxy = %proxy, bytes = config.len(), "Proxy configuration applied");
        SyncOutcome::Applied { config }
    }

    async fn apply(&self, config: &str) -> Result<(), String> {
        let proxy = &self.config.container_name;
        self.lifecycle
            .upload_file(proxy, &self.config.config_path, config.as_bytes())
            .await
            .map_err(|e| e.to_string())?;

        let reload = vec![
            "caddy".to_string(),
            "reload".to_string(),
            "--config".to_string(),
            self.config.config_path.clone(),
            "--adapter".to_string(),
            "caddyfile".to_string(),
        ];
        let output = self
            .lifecycle
            .exec_in_container(proxy, &reload)
            .await
            .map_err(|e| e.to_string())?;
        if !output.success() {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim()
            } else {
                output.stderr.trim()
            };
            return Err(format!(
                "proxy reload exited with {}: {}",
                output.exit_code, detail
            ));
        }
        Ok(())
    }

    /// Run a sync in the background. Failures are logged as warnings and
    /// never reach the caller. The returned receiver yields the outcome for
    /// callers that want it; dropping it does not cancel the sync.
    ///
    /// Pending syncs are tracked until [`wait_idle`](Self::wait_idle).
    pub fn spawn_sync(self: &Arc<Self>, reason: &'static str) -> oneshot::Receiver<SyncOutcome> {
        let (tx, rx) = oneshot::channel();
        let this = Arc::clone(self);

        let mut pending = self.pending();
        // Reap finished syncs so the set stays small in long-lived processes.
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            let outcome = this.sync_endpoints().await;
            if let Some(error) = outcome.error() {
                tracing::warn!(reason, "Proxy sync failed: {}", error);
            } else {
                tracing::debug!(reason, "Proxy sync finished");
            }
            let _ = tx.send(outcome);
        });
        rx
    }

    /// Wait for every background sync spawned so far, including any spawned
    /// while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let mut running = std::mem::take(&mut *self.pending());
            if running.is_empty() {
                return;
            }
            while let Some(result) = running.join_next().await {
                if let Err(e) = result {
                    tracing::warn!("Proxy sync task ended abnormally: {}", e);
                }
            }
        }
    }
}
