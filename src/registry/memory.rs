use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::RegistryError;
use crate::registry::{Project, ProjectRegistry, RegistryData, ServiceRecord, ServiceRegistry};

/// Volatile registry. Used by tests and as a scratch store.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    data: RwLock<RegistryData>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projects(projects: Vec<Project>) -> Self {
        Self {
            data: RwLock::new(RegistryData {
                projects,
                services: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl ProjectRegistry for InMemoryRegistry {
    async fn list_projects(&self) -> Result<Vec<Project>, RegistryError> {
        Ok(self.data.read().await.projects.clone())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, RegistryError> {
        Ok(self
            .data
            .read()
            .await
            .projects
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn save_project(&self, project: &Project) -> Result<(), RegistryError> {
        self.data.write().await.upsert_project(project);
        Ok(())
    }

    async fn remove_project(&self, id: &str) -> Result<bool, RegistryError> {
        Ok(self.data.write().await.remove_project(id))
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, RegistryError> {
        Ok(self.data.read().await.services.clone())
    }

    async fn get_service(&self, id: &str) -> Result<Option<ServiceRecord>, RegistryError> {
        Ok(self
            .data
            .read()
            .await
            .services
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn save_service(&self, service: &ServiceRecord) -> Result<(), RegistryError> {
        self.data.write().await.upsert_service(service);
        Ok(())
    }

    async fn remove_service(&self, id: &str) -> Result<bool, RegistryError> {
        Ok(self.data.write().await.remove_service(id))
    }
}
