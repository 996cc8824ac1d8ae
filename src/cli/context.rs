use std::sync::Arc;

use crate::config::Config;
use crate::engine::{BollardEngine, ContainerEngine};
use crate::entities::{ProjectManager, ServiceManager};
use crate::hosts::{HelperHostsEditor, HostsEditor, NoopHostsEditor};
use crate::lifecycle::ContainerManager;
use crate::ports::PortResolver;
use crate::proxy::ProxySynchronizer;
use crate::registry::JsonFileRegistry;

/// The component graph, built once per process.
pub struct AppContext {
    pub config: Config,
    pub engine: Arc<dyn ContainerEngine>,
    pub registry: Arc<JsonFileRegistry>,
    pub lifecycle: Arc<ContainerManager>,
    pub proxy: Arc<ProxySynchronizer>,
    pub projects: ProjectManager,
    pub services: ServiceManager,
}

impl AppContext {
    /// Connect to the engine and wire every component.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let engine = BollardEngine::connect().await?;
        Ok(Self::new(config, Arc::new(engine)))
    }

    pub fn new(config: Config, engine: Arc<dyn ContainerEngine>) -> Self {
        let registry = Arc::new(JsonFileRegistry::new(&config.projects.registry_path));
        let hosts: Arc<dyn HostsEditor> = match &config.projects.hosts_helper {
            Some(helper) => Arc::new(HelperHostsEditor::new(helper)),
            None => Arc::new(NoopHostsEditor),
        };

        let resolver = PortResolver::new(config.ports.clone());
        let lifecycle = Arc::new(ContainerManager::new(
            Arc::clone(&engine),
            resolver,
            config.engine.clone(),
        ));
        let proxy = Arc::new(ProxySynchronizer::new(
            Arc::clone(&lifecycle),
            registry.clone(),
            config.proxy.clone(),
        ));
        let projects = ProjectManager::new(
            Arc::clone(&lifecycle),
            registry.clone(),
            Arc::clone(&proxy),
            hosts,
            config.projects.clone(),
        );
        let services = ServiceManager::new(Arc::clone(&lifecycle), registry.clone(), Arc::clone(&proxy));

        Self {
            config,
            engine,
            registry,
            lifecycle,
            proxy,
            projects,
            services,
        }
    }
}
