use std::sync::Arc;

use serde::Serialize;

use crate::engine::{LabelKey, OwnerTag, OwnerType};
use crate::entities::EntityLocks;
use crate::entities::catalog::{ServiceDefinition, ServiceHook, catalog, find_service};
use crate::error::{EngineError, EntityError, LifecycleError};
use crate::lifecycle::{ContainerManager, ContainerOverrides, ContainerStateSnapshot};
use crate::proxy::ProxySynchronizer;
use crate::registry::{ServiceRecord, ServiceRegistry};

const STOP_TIMEOUT_SECS: u32 = 10;

type Result<T> = std::result::Result<T, EntityError>;

/// A catalog service with its install and container state.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub id: String,
    pub name: String,
    pub image: String,
    pub installed: bool,
    pub container: ContainerStateSnapshot,
}

/// Installs and drives catalog services.
pub struct ServiceManager {
    lifecycle: Arc<ContainerManager>,
    registry: Arc<dyn ServiceRegistry>,
    proxy: Arc<ProxySynchronizer>,
    locks: EntityLocks,
}

impl ServiceManager {
    pub fn new(
        lifecycle: Arc<ContainerManager>,
        registry: Arc<dyn ServiceRegistry>,
        proxy: Arc<ProxySynchronizer>,
    ) -> Self {
        Self {
            lifecycle,
            registry,
            proxy,
            locks: EntityLocks::new(),
        }
    }

    fn definition(id: &str) -> Result<&'static ServiceDefinition> {
        find_service(id).ok_or_else(|| EntityError::UnknownService { id: id.to_string() })
    }

    async fn record(&self, id: &str) -> Result<ServiceRecord> {
        self.registry
            .get_service(id)
            .await?
            .ok_or_else(|| EntityError::NotFound {
                kind: "service",
                id: id.to_string(),
            })
    }

    /// Container id for the service, if one exists.
    async fn container_id(&self, id: &str) -> Result<Option<String>> {
        Ok(self
            .lifecycle
            .find_container_by_owner(&OwnerTag::service(id))
            .await?
            .map(|c| c.id))
    }

    /// Create and start the service container from its record.
    async fn provision(&self, def: &ServiceDefinition, record: &ServiceRecord) -> Result<String> {
        let owner = OwnerTag::service(def.id);
        let container = self
            .lifecycle
            .create_container(&def.default_spec(), &record.overrides, &owner)
            .await?;
        if let Err(e) = self.lifecycle.start_container(&container).await {
            tracing::warn!(service = def.id, "Start failed, removing new container");
            if let Err(cleanup) = self.lifecycle.remove_container(&container, false).await {
                tracing::warn!(service = def.id, "Cleanup failed: {}", cleanup);
            }
            return Err(e.into());
        }
        Ok(container)
    }

    fn run_hook(&self, def: &ServiceDefinition, reason: &'static str) {
        match def.hook {
            ServiceHook::None => {}
            ServiceHook::ResyncProxy => {
                self.proxy.spawn_sync(reason);
            }
        }
    }

    /// Install a catalog service: create its container from the catalog
    /// defaults merged with `overrides`, start it, record it and run its
    /// post-install hook.
    pub async fn install(&self, id: &str, overrides: ContainerOverrides) -> Result<ServiceStatus> {
        let def = Self::definition(id)?;
        let _guard = self.locks.lock(id).await;

        if self.registry.get_service(id).await?.is_some() {
            return Err(EntityError::AlreadyExists {
                kind: "service",
                id: id.to_string(),
            });
        }

        // Leftover from an interrupted install or uninstall.
        if let Some(stale) = self.container_id(id).await? {
            tracing::info!(service = id, "Removing stale service container");
            self.lifecycle.remove_container(&stale, false).await?;
        }

        let record = ServiceRecord::new(id, overrides);
        self.provision(def, &record).await?;
        self.registry.save_service(&record).await?;
        tracing::info!(service = id, "Service installed");

        self.run_hook(def, "service installed");
        self.status_of(def, true).await
    }

    /// Remove the service container and record. Data volumes are kept
    /// unless `remove_volumes` is set; a volume still attached elsewhere
    /// fails with [`LifecycleError::InUse`] and leaves the record in place.
    pub async fn uninstall(&self, id: &str, remove_volumes: bool) -> Result<()> {
        Self::definition(id)?;
        let _guard = self.locks.lock(id).await;
        self.record(id).await?;

        if let Some(container) = self.container_id(id).await? {
            self.lifecycle.remove_container(&container, false).await?;
        }
        if remove_volumes {
            self.lifecycle
                .remove_managed_volumes(&OwnerTag::service(id), false)
                .await?;
        }
        self.registry.remove_service(id).await?;
        tracing::info!(service = id, remove_volumes, "Service uninstalled");
        Ok(())
    }

    /// Start an installed service, recreating its container if it has gone
    /// missing. Starting the proxy resyncs its routing table.
    pub async fn start(&self, id: &str) -> Result<ServiceStatus> {
        let def = Self::definition(id)?;
        let _guard = self.locks.lock(id).await;
        let record = self.record(id).await?;

        match self.container_id(id).await? {
            Some(container) => self.lifecycle.start_container(&container).await?,
            None => {
                tracing::info!(service = id, "Container missing, recreating");
                self.provision(def, &record).await?;
            }
        }

        self.run_hook(def, "service started");
        self.status_of(def, true).await
    }

    pub async fn stop(&self, id: &str) -> Result<ServiceStatus> {
        let def = Self::definition(id)?;
        let _guard = self.locks.lock(id).await;
        self.record(id).await?;

        if let Some(container) = self.container_id(id).await? {
            self.lifecycle
                .stop_container(&container, STOP_TIMEOUT_SECS)
                .await?;
        }
        self.status_of(def, true).await
    }

    pub async fn restart(&self, id: &str) -> Result<ServiceStatus> {
        let def = Self::definition(id)?;
        let _guard = self.locks.lock(id).await;
        self.record(id).await?;

        let container = self.container_id(id).await?.ok_or_else(|| {
            EntityError::Lifecycle(LifecycleError::Operation {
                op: "restart",
                target: def.container_name(),
                source: EngineError::NotFound {
                    resource: format!("container {}", def.container_name()),
                },
            })
        })?;
        self.lifecycle
            .restart_container(&container, STOP_TIMEOUT_SECS)
            .await?;
        self.run_hook(def, "service restarted");
        self.status_of(def, true).await
    }

    pub async fn status(&self, id: &str) -> Result<ServiceStatus> {
        let def = Self::definition(id)?;
        let installed = self.registry.get_service(id).await?.is_some();
        self.status_of(def, installed).await
    }

    /// Every catalog service, installed or not.
    pub async fn list(&self) -> Result<Vec<ServiceStatus>> {
        let installed = self.registry.list_services().await?;
        let mut out = Vec::with_capacity(catalog().len());
        for def in catalog() {
            let is_installed = installed.iter().any(|r| r.id == def.id);
            out.push(self.status_of(def, is_installed).await?);
        }
        Ok(out)
    }

    async fn status_of(&self, def: &ServiceDefinition, installed: bool) -> Result<ServiceStatus> {
        let container = self
            .lifecycle
            .get_container_state_by_label(
                LabelKey::OwnerId,
                def.id,
                Some(OwnerType::Service),
            )
            .await?;
        Ok(ServiceStatus {
            id: def.id.to_string(),
            name: def.name.to_string(),
            image: def.image.to_string(),
            installed,
            container,
        })
    }
}
