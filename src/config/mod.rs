//! Configuration for dockyard.
//!
//! Settings are loaded with priority: env var > default. `.env` files are
//! loaded by the binary before [`Config::from_env`] runs.

mod engine;
mod events;
pub(crate) mod helpers;
mod ports;
mod projects;
mod proxy;

pub use self::engine::EngineConfig;
pub use self::events::EventsConfig;
pub use self::ports::PortConfig;
pub use self::projects::{ProjectsConfig, default_registry_path};
pub use self::proxy::ProxyConfig;
pub(crate) use self::proxy::normalize_domain;

use crate::error::ConfigError;

/// Main configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub engine: EngineConfig,
    pub ports: PortConfig,
    pub proxy: ProxyConfig,
    pub events: EventsConfig,
    pub projects: ProjectsConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            engine: EngineConfig::resolve()?,
            ports: PortConfig::resolve()?,
            proxy: ProxyConfig::resolve()?,
            events: EventsConfig::resolve()?,
            projects: ProjectsConfig::resolve()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = Config::default();
        assert_eq!(config.proxy.project_port, 8080);
        assert!(config.ports.discovery_range.0 <= config.ports.discovery_range.1);
        assert!(config.events.backoff_initial <= config.events.backoff_max);
        assert!(config.projects.registry_path.ends_with("registry.json"));
    }
}
