use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

use crate::config::ProjectsConfig;
use crate::engine::{ContainerSpec, OwnerTag, PortMapping, RestartPolicy, VolumeBinding};
use crate::entities::{EntityLocks, sanitize_name};
use crate::error::EntityError;
use crate::hosts::HostsEditor;
use crate::lifecycle::{ContainerManager, ContainerOverrides, ContainerStateSnapshot};
use crate::ports::PortDiscovery;
use crate::proxy::ProxySynchronizer;
use crate::registry::{Project, ProjectRegistry};

const STOP_TIMEOUT_SECS: u32 = 10;
const WORKSPACE_DIR: &str = "/workspace";

type Result<T> = std::result::Result<T, EntityError>;

/// A project with its devcontainer state.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    #[serde(flatten)]
    pub project: Project,
    pub container: ContainerStateSnapshot,
}

/// Provisions per-project devcontainers and keeps the proxy and hosts file
/// in step with the project registry.
pub struct ProjectManager {
    lifecycle: Arc<ContainerManager>,
    registry: Arc<dyn ProjectRegistry>,
    proxy: Arc<ProxySynchronizer>,
    hosts: Arc<dyn HostsEditor>,
    discovery: PortDiscovery,
    config: ProjectsConfig,
    locks: EntityLocks,
}

impl ProjectManager {
    pub fn new(
        lifecycle: Arc<ContainerManager>,
        registry: Arc<dyn ProjectRegistry>,
        proxy: Arc<ProxySynchronizer>,
        hosts: Arc<dyn HostsEditor>,
        config: ProjectsConfig,
    ) -> Self {
        let discovery = PortDiscovery::new(lifecycle.resolver().config().probe_timeout);
        Self {
            lifecycle,
            registry,
            proxy,
            hosts,
            discovery,
            config,
            locks: EntityLocks::new(),
        }
    }

    fn project_port(&self) -> u16 {
        self.proxy.config().project_port
    }

    /// Lock the project behind `id` under its sanitized name, the same key
    /// `create` holds, and re-read it once the lock is ours.
    async fn lock_project(&self, id: &str) -> Result<(OwnedMutexGuard<()>, Project)> {
        let sanitized = self.project(id).await?.sanitized_name();
        let guard = self.locks.lock(&sanitized).await;
        let project = self.project(id).await?;
        Ok((guard, project))
    }

    async fn project(&self, id: &str) -> Result<Project> {
        self.registry
            .get_project(id)
            .await?
            .ok_or_else(|| EntityError::NotFound {
                kind: "project",
                id: id.to_string(),
            })
    }

    /// Devcontainer spec for `project`.
    pub fn container_spec(&self, project: &Project) -> ContainerSpec {
        let port = self.project_port();
        let mut volumes = vec![VolumeBinding::new(
            project.volume_name(),
            format!("/home/{}", project.sanitized_name()),
        )];
        if let Some(path) = &project.path {
            volumes.push(VolumeBinding::new(path.display().to_string(), WORKSPACE_DIR));
        }
        ContainerSpec {
            name: project.container_name(),
            image: self.config.devcontainer_image.clone(),
            ports: vec![PortMapping::new(port, port)],
            env: vec![
                ("DOCKYARD_PROJECT".to_string(), project.name.clone()),
                ("DOCKYARD_DOMAIN".to_string(), project.domain.clone()),
                ("CONTAINER_NAME".to_string(), project.container_name()),
            ],
            volumes,
            restart_policy: RestartPolicy::UnlessStopped,
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
        }
    }

    async fn provision(&self, project: &Project) -> Result<String> {
        let owner = OwnerTag::project(&project.id);
        let container = self
            .lifecycle
            .create_container(&self.container_spec(project), &ContainerOverrides::default(), &owner)
            .await?;
        self.lifecycle.start_container(&container).await?;
        Ok(container)
    }

    /// Register a project, add its hosts entry, provision and start its
    /// devcontainer, then resync the proxy in the background.
    ///
    /// If provisioning fails the record and hosts entry are rolled back.
    pub async fn create(&self, name: &str, path: Option<PathBuf>) -> Result<Project> {
        let sanitized = sanitize_name(name);
        if sanitized.is_empty() {
            return Err(EntityError::Invalid {
                field: "name",
                reason: "must contain at least one letter or digit".to_string(),
            });
        }
        let _guard = self.locks.lock(&sanitized).await;

        let existing = self.registry.list_projects().await?;
        if existing.iter().any(|p| p.sanitized_name() == sanitized) {
            return Err(EntityError::AlreadyExists {
                kind: "project",
                id: sanitized,
            });
        }

        let project = Project::new(name, &self.config.domain_suffix, path);
        self.registry.save_project(&project).await?;

        let hosts = self
            .hosts
            .add_host_entry(&self.config.host_ip, &project.domain)
            .await;
        if !hosts.success {
            tracing::warn!(
                domain = %project.domain,
                "Hosts entry not added: {}",
                hosts.error.as_deref().unwrap_or("unknown error")
            );
        }

        if let Err(e) = self.provision(&project).await {
            tracing::warn!(project = %project.name, "Provisioning failed, rolling back: {}", e);
            self.rollback(&project).await;
            return Err(e);
        }

        tracing::info!(project = %project.name, domain = %project.domain, "Project created");
        self.proxy.spawn_sync("project created");
        Ok(project)
    }

    async fn rollback(&self, project: &Project) {
        if let Ok(Some(container)) = self
            .lifecycle
            .find_container_by_owner(&OwnerTag::project(&project.id))
            .await
            && let Err(e) = self.lifecycle.remove_container(&container.id, false).await
        {
            tracing::warn!(project = %project.name, "Container cleanup failed: {}", e);
        }
        self.hosts
            .remove_host_entry(&self.config.host_ip, &project.domain)
            .await;
        if let Err(e) = self.registry.remove_project(&project.id).await {
            tracing::warn!(project = %project.name, "Registry cleanup failed: {}", e);
        }
    }

    /// Remove the devcontainer, its volumes (when `remove_volumes`), the
    /// hosts entry and the record, then resync the proxy.
    pub async fn delete(&self, id: &str, remove_volumes: bool) -> Result<()> {
        let (_guard, project) = self.lock_project(id).await?;
        let owner = OwnerTag::project(&project.id);

        if let Some(container) = self.lifecycle.find_container_by_owner(&owner).await? {
            self.lifecycle.remove_container(&container.id, true).await?;
        }
        if remove_volumes {
            self.lifecycle.remove_managed_volumes(&owner, false).await?;
        }

        let hosts = self
            .hosts
            .remove_host_entry(&self.config.host_ip, &project.domain)
            .await;
        if !hosts.success {
            tracing::warn!(
                domain = %project.domain,
                "Hosts entry not removed: {}",
                hosts.error.as_deref().unwrap_or("unknown error")
            );
        }

        self.registry.remove_project(&project.id).await?;
        tracing::info!(project = %project.name, "Project deleted");
        self.proxy.spawn_sync("project deleted");
        Ok(())
    }

    /// Start the devcontainer, recreating it when it has gone missing.
    pub async fn start(&self, id: &str) -> Result<ContainerStateSnapshot> {
        let (_guard, project) = self.lock_project(id).await?;

        match self
            .lifecycle
            .find_container_by_owner(&OwnerTag::project(&project.id))
            .await?
        {
            Some(container) => self.lifecycle.start_container(&container.id).await?,
            None => {
                tracing::info!(project = %project.name, "Devcontainer missing, recreating");
                self.provision(&project).await?;
            }
        }
        self.state_of(&project).await
    }

    pub async fn stop(&self, id: &str) -> Result<ContainerStateSnapshot> {
        let (_guard, project) = self.lock_project(id).await?;

        if let Some(container) = self
            .lifecycle
            .find_container_by_owner(&OwnerTag::project(&project.id))
            .await?
        {
            self.lifecycle
                .stop_container(&container.id, STOP_TIMEOUT_SECS)
                .await?;
        }
        self.state_of(&project).await
    }

    pub async fn state(&self, id: &str) -> Result<ContainerStateSnapshot> {
        let project = self.project(id).await?;
        self.state_of(&project).await
    }

    async fn state_of(&self, project: &Project) -> Result<ContainerStateSnapshot> {
        let by_owner = self
            .lifecycle
            .find_container_by_owner(&OwnerTag::project(&project.id))
            .await?;
        let target = by_owner
            .map(|c| c.id)
            .unwrap_or_else(|| project.container_name());
        Ok(self.lifecycle.get_container_state(&target).await?)
    }

    /// Host port the project's web server is reachable on.
    ///
    /// The published binding is used when the engine reports one; otherwise
    /// the discovery range is swept for the container's identity header.
    /// The sweep is slow, so this only runs on demand.
    pub async fn forwarded_port(&self, id: &str) -> Result<Option<u16>> {
        let project = self.project(id).await?;
        let state = self.state_of(&project).await?;
        if let Some(port) = state.host_port_for(self.project_port()) {
            return Ok(Some(port));
        }

        let (start, end) = self.lifecycle.resolver().config().discovery_range;
        Ok(self
            .discovery
            .discover_forwarded_port(&project.container_name(), start, end)
            .await)
    }

    pub async fn list(&self) -> Result<Vec<ProjectStatus>> {
        let mut projects = self.registry.list_projects().await?;
        projects.sort_by(|a, b| a.name.cmp(&b.name));

        let mut out = Vec::with_capacity(projects.len());
        for project in projects {
            let container = self.state_of(&project).await?;
            out.push(ProjectStatus { project, container });
        }
        Ok(out)
    }

    /// Look a project up by id or, failing that, by name.
    pub async fn find(&self, id_or_name: &str) -> Result<Project> {
        if let Some(project) = self.registry.get_project(id_or_name).await? {
            return Ok(project);
        }
        let wanted = sanitize_name(id_or_name);
        self.registry
            .list_projects()
            .await?
            .into_iter()
            .find(|p| p.sanitized_name() == wanted)
            .ok_or_else(|| EntityError::NotFound {
                kind: "project",
                id: id_or_name.to_string(),
            })
    }
}
