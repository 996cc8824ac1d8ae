//! Persisted project and service records.
//!
//! The orchestration core reads these to map container names back to
//! entities and to render the proxy routing table. The state managers are
//! the only writers.

mod json;
mod memory;

pub use json::JsonFileRegistry;
pub use memory::InMemoryRegistry;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::sanitize_name;
use crate::error::RegistryError;
use crate::lifecycle::ContainerOverrides;

/// Container name suffix for project devcontainers.
pub const DEVCONTAINER_SUFFIX: &str = "devcontainer";

/// Container name prefix for catalog services.
pub const SERVICE_PREFIX: &str = "dockyard";

/// A per-project sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Stable local domain, e.g. `demo.local`.
    pub domain: String,
    /// Host directory mounted into the devcontainer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, domain_suffix: &str, path: Option<PathBuf>) -> Self {
        let name = name.into();
        let domain = format!("{}.{}", sanitize_name(&name).replace('_', "-"), domain_suffix);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            domain,
            path,
            created_at: Utc::now(),
        }
    }

    pub fn sanitized_name(&self) -> String {
        sanitize_name(&self.name)
    }

    /// `{sanitized}_devcontainer`, also the container's DNS name on the network.
    pub fn container_name(&self) -> String {
        format!("{}_{}", self.sanitized_name(), DEVCONTAINER_SUFFIX)
    }

    /// Named volume holding the project's workspace state.
    pub fn volume_name(&self) -> String {
        format!("{}_data", self.sanitized_name())
    }
}

/// An installed catalog service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Catalog id, e.g. `mysql`.
    pub id: String,
    #[serde(default)]
    pub overrides: ContainerOverrides,
    pub installed_at: DateTime<Utc>,
}

impl ServiceRecord {
    pub fn new(id: impl Into<String>, overrides: ContainerOverrides) -> Self {
        Self {
            id: id.into(),
            overrides,
            installed_at: Utc::now(),
        }
    }

    pub fn container_name(&self) -> String {
        service_container_name(&self.id)
    }
}

/// `dockyard_{service_id}`.
pub fn service_container_name(service_id: &str) -> String {
    format!("{}_{}", SERVICE_PREFIX, service_id)
}

/// Project records. Keyed by project id.
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Project>, RegistryError>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>, RegistryError>;

    /// Insert or replace.
    async fn save_project(&self, project: &Project) -> Result<(), RegistryError>;

    /// Returns whether a record was removed.
    async fn remove_project(&self, id: &str) -> Result<bool, RegistryError>;
}

/// Installed service records. Keyed by catalog id.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, RegistryError>;

    async fn get_service(&self, id: &str) -> Result<Option<ServiceRecord>, RegistryError>;

    async fn save_service(&self, service: &ServiceRecord) -> Result<(), RegistryError>;

    async fn remove_service(&self, id: &str) -> Result<bool, RegistryError>;
}

/// Registry snapshot as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct RegistryData {
    pub projects: Vec<Project>,
    pub services: Vec<ServiceRecord>,
}

impl RegistryData {
    pub(crate) fn upsert_project(&mut self, project: &Project) {
        match self.projects.iter_mut().find(|p| p.id == project.id) {
            Some(existing) => *existing = project.clone(),
            None => self.projects.push(project.clone()),
        }
    }

    pub(crate) fn upsert_service(&mut self, service: &ServiceRecord) {
        match self.services.iter_mut().find(|s| s.id == service.id) {
            Some(existing) => *existing = service.clone(),
            None => self.services.push(service.clone()),
        }
    }

    pub(crate) fn remove_project(&mut self, id: &str) -> bool {
        let before = self.projects.len();
        self.projects.retain(|p| p.id != id);
        self.projects.len() != before
    }

    pub(crate) fn remove_service(&mut self, id: &str) -> bool {
        let before = self.services.len();
        self.services.retain(|s| s.id != id);
        self.services.len() != before
    }
}
