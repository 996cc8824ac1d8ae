use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::RegistryError;
use crate::registry::{Project, ProjectRegistry, RegistryData, ServiceRecord, ServiceRegistry};

/// Registry persisted as one JSON document.
///
/// Every mutation rewrites the whole file through a temporary sibling and
/// a rename, so readers never observe a half-written document. A missing
/// file reads as an empty registry.
#[derive(Debug)]
pub struct JsonFileRegistry {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, e: std::io::Error) -> RegistryError {
        RegistryError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }

    async fn load(&self) -> Result<RegistryData, RegistryError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RegistryData::default());
            }
            Err(e) => return Err(self.io_err(e)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(RegistryData::default());
        }
        serde_json::from_slice(&raw).map_err(|e| RegistryError::Corrupt {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    async fn store(&self, data: &RegistryData) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(|e| self.io_err(e))?;
        }

        let json = serde_json::to_vec_pretty(data).map_err(|e| RegistryError::Corrupt {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json).await.map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;
        tracing::debug!(path = %self.path.display(), "Registry written");
        Ok(())
    }

    async fn update<T>(&self, f: impl FnOnce(&mut RegistryData) -> T) -> Result<T, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;
        let out = f(&mut data);
        self.store(&data).await?;
        Ok(out)
    }
}

#[async_trait]
impl ProjectRegistry for JsonFileRegistry {
    async fn list_projects(&self) -> Result<Vec<Project>, RegistryError> {
        Ok(self.load().await?.projects)
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, RegistryError> {
        Ok(self.load().await?.projects.into_iter().find(|p| p.id == id))
    }

    async fn save_project(&self, project: &Project) -> Result<(), RegistryError> {
        self.update(|data| data.upsert_project(project)).await
    }

    async fn remove_project(&self, id: &str) -> Result<bool, RegistryError> {
        self.update(|data| data.remove_project(id)).await
    }
}

#[async_trait]
impl ServiceRegistry for JsonFileRegistry {
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, RegistryError> {
        Ok(self.load().await?.services)
    }

    async fn get_service(&self, id: &str) -> Result<Option<ServiceRecord>, RegistryError> {
        Ok(self.load().await?.services.into_iter().find(|s| s.id == id))
    }

    async fn save_service(&self, service: &ServiceRecord) -> Result<(), RegistryError> {
        self.update(|data| data.upsert_service(service)).await
    }

    async fn remove_service(&self, id: &str) -> Result<bool, RegistryError> {
        self.update(|data| data.remove_service(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ContainerOverrides;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JsonFileRegistry::new(dir.path().join("registry.json"));
        assert!(registry.list_projects().await.unwrap().is_empty());
        assert!(registry.get_service("mysql").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("registry.json");

        let project = Project::new("demo", "local", None);
        {
            let registry = JsonFileRegistry::new(&path);
            registry.save_project(&project).await.unwrap();
            registry
                .save_service(&ServiceRecord::new("redis", ContainerOverrides::default()))
                .await
                .unwrap();
        }

        let registry = JsonFileRegistry::new(&path);
        assert_eq!(registry.get_project(&project.id).await.unwrap(), Some(project.clone()));
        assert_eq!(registry.list_services().await.unwrap().len(), 1);

        assert!(registry.remove_project(&project.id).await.unwrap());
        assert!(registry.list_projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let registry = JsonFileRegistry::new(&path);
        let err = registry.list_projects().await.unwrap_err();
        assert!(matches!(err, RegistryError::Corrupt { .. }));
    }
}
