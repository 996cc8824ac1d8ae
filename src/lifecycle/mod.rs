//! Container lifecycle management.
//!
//! [`ContainerManager`] is the only component that drives the engine for
//! entity containers. It owns port resolution for new containers, keeps the
//! shared network and named volumes present, and translates every engine
//! failure into a [`LifecycleError`].
//!
//! # Failure semantics
//!
//! - Missing resources on lookup or removal are success/absent.
//! - Name or attachment conflicts surface as [`LifecycleError::InUse`].
//! - An unreachable engine surfaces as [`LifecycleError::Unavailable`];
//!   [`ContainerManager::is_available`] folds it into a boolean.

mod logs;
mod overrides;
mod snapshot;
mod stats;

pub use logs::{LogCloser, LogStream};
pub use overrides::ContainerOverrides;
pub use snapshot::ContainerStateSnapshot;
pub use stats::ResourceStats;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::labels::{LABEL_OWNER_TYPE, infrastructure_labels, managed_filter};
use crate::engine::{
    ContainerEngine, ContainerSpec, ContainerSummary, ExecOutput, LabelKey, OwnerTag, OwnerType,
    PortMapping,
};
use crate::error::{EngineError, LifecycleError};
use crate::ports::PortResolver;

type Result<T> = std::result::Result<T, LifecycleError>;

/// Drives the container engine for managed containers, networks and volumes.
pub struct ContainerManager {
    engine: Arc<dyn ContainerEngine>,
    resolver: PortResolver,
    config: EngineConfig,
}

impl ContainerManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, resolver: PortResolver, config: EngineConfig) -> Self {
        Self {
            engine,
            resolver,
            config,
        }
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &PortResolver {
        &self.resolver
    }

    /// Whether the engine answers a ping within the call timeout.
    pub async fn is_available(&self) -> bool {
        match tokio::time::timeout(self.config.call_timeout, self.engine.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!("Engine ping failed: {}", e);
                false
            }
            Err(_) => {
                tracing::debug!("Engine ping timed out");
                false
            }
        }
    }

    /// Create the bridge network unless it already exists.
    pub async fn ensure_network_exists(&self, name: &str) -> Result<()> {
        let exists = self
            .engine
            .network_exists(name)
            .await
            .map_err(|e| LifecycleError::from_engine("inspect network", name, e))?;
        if exists {
            return Ok(());
        }

        match self.engine.create_network(name, &infrastructure_labels()).await {
            Ok(()) => {
                tracing::info!(network = %name, "Created network");
                Ok(())
            }
            // Someone else created it between the check and the create.
            Err(EngineError::Conflict { .. }) => Ok(()),
            Err(e) => Err(LifecycleError::from_engine("create network", name, e)),
        }
    }

    /// Create each named volume that does not exist yet.
    pub async fn ensure_volumes_exist(
        &self,
        names: &[String],
        labels: &HashMap<String, String>,
    ) -> Result<()> {
        for name in names {
            let exists = self
                .engine
                .volume_exists(name)
                .await
                .map_err(|e| LifecycleError::from_engine("inspect volume", name, e))?;
            if exists {
                continue;
            }
            match self.engine.create_volume(name, labels).await {
                Ok(()) => tracing::info!(volume = %name, "Created volume"),
                Err(EngineError::Conflict { .. }) => {}
                Err(e) => return Err(LifecycleError::from_engine("create volume", name, e)),
            }
        }
        Ok(())
    }

    /// Host ports published by managed containers, running or not.
    /// `except` excludes one container by name.
    async fn published_host_ports(&self, except: &str) -> Result<BTreeSet<u16>> {
        let containers = self
            .engine
            .list_containers(&managed_filter(), true)
            .await
            .map_err(|e| LifecycleError::from_engine("list containers", "managed", e))?;
        Ok(containers
            .iter()
            .filter(|c| c.name != except)
            .flat_map(|c| c.ports.iter().map(|p| p.host_port))
            .collect())
    }

    /// Create a container from `defaults` merged with `overrides`, owned by
    /// `owner`. Returns the engine-assigned id.
    ///
    /// Host ports are resolved first; the shared network and any named
    /// volumes are created on demand. Port exhaustion is reported as
    /// [`LifecycleError::PortExhausted`]; every engine failure as
    /// [`LifecycleError::Create`].
    pub async fn create_container(
        &self,
        defaults: &ContainerSpec,
        overrides: &ContainerOverrides,
        owner: &OwnerTag,
    ) -> Result<String> {
        let mut spec = overrides.apply(defaults);
        let name = spec.name.clone();
        let create_err = |source: EngineError| LifecycleError::Create {
            name: name.clone(),
            source,
        };

        let mut container_ports = BTreeSet::new();
        if let Some(dup) = spec
            .ports
            .iter()
            .find(|p| !container_ports.insert(p.container_port))
        {
            return Err(LifecycleError::DuplicatePort {
                name: name.clone(),
                container_port: dup.container_port,
            });
        }

        if !spec.ports.is_empty() {
            let reserved = match self.published_host_ports(&name).await {
                Ok(reserved) => reserved,
                Err(LifecycleError::Unavailable { reason }) => {
                    return Err(create_err(EngineError::Unavailable { reason }));
                }
                Err(e) => {
                    tracing::warn!(container = %name, "Could not list published ports: {}", e);
                    BTreeSet::new()
                }
            };
            let desired: Vec<u16> = spec.ports.iter().map(|p| p.host_port).collect();
            let actual = self.resolver.resolve_each(&desired, &reserved).await?;
            for (mapping, host_port) in spec.ports.iter_mut().zip(actual) {
                mapping.host_port = host_port;
            }
        }

        let network = self.config.network.clone();
        self.ensure_network_exists(&network)
            .await
            .map_err(|e| create_err(lifecycle_cause(e)))?;

        let labels = owner.to_labels();
        let volumes: Vec<String> = spec
            .volumes
            .iter()
            .filter(|v| v.is_named_volume())
            .map(|v| v.source.clone())
            .collect();
        self.ensure_volumes_exist(&volumes, &labels)
            .await
            .map_err(|e| create_err(lifecycle_cause(e)))?;

        let id = self
            .engine
            .create_container(&spec, &labels, &network)
            .await
            .map_err(create_err)?;

        tracing::info!(
            container = %name,
            id = %short_id(&id),
            owner = %owner.owner_id,
            ports = ?spec.ports,
            "Created container"
        );
        Ok(id)
    }

    pub async fn start_container(&self, id: &str) -> Result<()> {
        match self.engine.start_container(id).await {
            Ok(()) | Err(EngineError::NotModified { .. }) => {
                tracing::info!(container = %id, "Started container");
                Ok(())
            }
            Err(e) => Err(LifecycleError::from_engine("start", id, e)),
        }
    }

    pub async fn stop_container(&self, id: &str, timeout_secs: u32) -> Result<()> {
        match self.engine.stop_container(id, timeout_secs).await {
            Ok(()) | Err(EngineError::NotModified { .. }) => {
                tracing::info!(container = %id, "Stopped container");
                Ok(())
            }
            Err(e) => Err(LifecycleError::from_engine("stop", id, e)),
        }
    }

    pub async fn restart_container(&self, id: &str, timeout_secs: u32) -> Result<()> {
        self.engine
            .restart_container(id, timeout_secs)
            .await
            .map_err(|e| LifecycleError::from_engine("restart", id, e))?;
        tracing::info!(container = %id, "Restarted container");
        Ok(())
    }

    /// Stop (best effort) and force-remove a container. A container that
    /// is already gone counts as removed.
    pub async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<()> {
        let state = self.get_container_state(id).await?;
        if !state.exists {
            tracing::debug!(container = %id, "Container already absent");
            return Ok(());
        }
        if state.running
            && let Err(e) = self.engine.stop_container(id, 10).await
        {
            tracing::debug!(container = %id, "Graceful stop before removal failed: {}", e);
        }

        match self.engine.remove_container(id, remove_volumes, true).await {
            Ok(()) | Err(EngineError::NotFound { .. }) => {
                tracing::info!(container = %id, "Removed container");
                Ok(())
            }
            Err(e) => Err(LifecycleError::from_engine("remove", id, e)),
        }
    }

    /// Current state of a container. Never fails for a missing container;
    /// returns [`ContainerStateSnapshot::absent`] instead.
    pub async fn get_container_state(&self, id: &str) -> Result<ContainerStateSnapshot> {
        match self.engine.inspect_container(id).await {
            Ok(details) => Ok(details.into()),
            Err(EngineError::NotFound { .. }) => Ok(ContainerStateSnapshot::absent()),
            Err(e) => Err(LifecycleError::from_engine("inspect", id, e)),
        }
    }

    /// Whether a container exists and is running. Any failure reads as `false`.
    pub async fn is_running(&self, id: &str) -> bool {
        match self.get_container_state(id).await {
            Ok(state) => state.running,
            Err(e) => {
                tracing::debug!(container = %id, "State lookup failed: {}", e);
                false
            }
        }
    }

    /// First managed container whose label `key` equals `value`, optionally
    /// restricted to one owner type.
    pub async fn find_container_by_label(
        &self,
        key: LabelKey,
        value: &str,
        owner_type: Option<OwnerType>,
    ) -> Result<Option<ContainerSummary>> {
        let mut filters = managed_filter();
        filters.push((key.as_label().to_string(), value.to_string()));
        if let Some(owner_type) = owner_type {
            filters.push((LABEL_OWNER_TYPE.to_string(), owner_type.as_str().to_string()));
        }

        let containers = self
            .engine
            .list_containers(&filters, true)
            .await
            .map_err(|e| LifecycleError::from_engine("list containers", value, e))?;
        Ok(containers.into_iter().next())
    }

    /// Container owned by `owner`, if any.
    pub async fn find_container_by_owner(&self, owner: &OwnerTag) -> Result<Option<ContainerSummary>> {
        self.find_container_by_label(LabelKey::OwnerId, &owner.owner_id, Some(owner.owner_type))
            .await
    }

    /// [`find_container_by_label`](Self::find_container_by_label) followed
    /// by a state read. Absent when no container carries the label.
    pub async fn get_container_state_by_label(
        &self,
        key: LabelKey,
        value: &str,
        owner_type: Option<OwnerType>,
    ) -> Result<ContainerStateSnapshot> {
        match self.find_container_by_label(key, value, owner_type).await? {
            Some(container) => self.get_container_state(&container.id).await,
            None => Ok(ContainerStateSnapshot::absent()),
        }
    }

    /// Run a command inside a container and wait for it to finish.
    ///
    /// Dropping the returned future abandons the exec.
    pub async fn exec_in_container(&self, id: &str, argv: &[String]) -> Result<ExecOutput> {
        if argv.is_empty() {
            return Err(LifecycleError::Operation {
                op: "exec",
                target: id.to_string(),
                source: EngineError::Api {
                    reason: "empty command".to_string(),
                },
            });
        }
        self.engine
            .exec(id, argv)
            .await
            .map_err(|e| LifecycleError::from_engine("exec", id, e))
    }

    /// Write a single file into a container, replacing any existing file.
    pub async fn upload_file(&self, id: &str, path: &str, contents: &[u8]) -> Result<()> {
        self.engine
            .upload_file(id, path, contents)
            .await
            .map_err(|e| LifecycleError::from_engine("upload file", id, e))
    }

    /// Follow a container's logs, starting from the last `tail` lines.
    pub fn stream_logs(&self, id: &str, tail: Option<usize>) -> LogStream {
        LogStream::spawn(id.to_string(), self.engine.logs(id, tail, true))
    }

    /// Remove a volume. Missing volumes are success; attached volumes fail
    /// with [`LifecycleError::InUse`] unless `force` is set.
    pub async fn remove_volume(&self, name: &str, force: bool) -> Result<()> {
        match self.engine.remove_volume(name, force).await {
            Ok(()) => {
                tracing::info!(volume = %name, "Removed volume");
                Ok(())
            }
            Err(EngineError::NotFound { .. }) => Ok(()),
            Err(e) => Err(LifecycleError::from_engine("remove volume", name, e)),
        }
    }

    /// Remove every volume labelled for `owner`.
    pub async fn remove_managed_volumes(&self, owner: &OwnerTag, force: bool) -> Result<()> {
        let volumes = self
            .engine
            .list_volumes(&owner.filters())
            .await
            .map_err(|e| LifecycleError::from_engine("list volumes", &owner.owner_id, e))?;
        for volume in volumes {
            self.remove_volume(&volume, force).await?;
        }
        Ok(())
    }

}

/// Pull the engine error back out of a nested lifecycle failure.
fn lifecycle_cause(err: LifecycleError) -> EngineError {
    match err {
        LifecycleError::Unavailable { reason } => EngineError::Unavailable { reason },
        LifecycleError::InUse { resource, reason } => EngineError::Conflict { resource, reason },
        LifecycleError::Create { source, .. } | LifecycleError::Operation { source, .. } => source,
        other => EngineError::Api {
            reason: other.to_string(),
        },
    }
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
