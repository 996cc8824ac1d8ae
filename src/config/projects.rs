use std::path::PathBuf;

use crate::config::helpers::optional_env;
use crate::error::ConfigError;

/// Defaults applied when provisioning project sandboxes.
#[derive(Debug, Clone)]
pub struct ProjectsConfig {
    /// Image used for project devcontainers.
    pub devcontainer_image: String,
    /// Suffix appended to sanitized project names to form domains.
    pub domain_suffix: String,
    /// Address written into hosts entries.
    pub host_ip: String,
    /// Elevated helper that edits the hosts file. `None` disables hosts editing.
    pub hosts_helper: Option<PathBuf>,
    /// JSON file backing the project/service registries.
    pub registry_path: PathBuf,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            devcontainer_image: "mcr.microsoft.com/devcontainers/base:ubuntu".to_string(),
            domain_suffix: "local".to_string(),
            host_ip: "127.0.0.1".to_string(),
            hosts_helper: None,
            registry_path: default_registry_path(),
        }
    }
}

/// `~/.dockyard/registry.json`, or a relative fallback when no home dir exists.
pub fn default_registry_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".dockyard"))
        .unwrap_or_else(|| PathBuf::from(".dockyard"))
        .join("registry.json")
}

impl ProjectsConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let domain_suffix = optional_env("DOCKYARD_DOMAIN_SUFFIX")?
            .map(|s| s.trim_start_matches('.').to_string())
            .unwrap_or(defaults.domain_suffix);
        if domain_suffix.is_empty() || domain_suffix.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                key: "DOCKYARD_DOMAIN_SUFFIX".to_string(),
                message: "must be a non-empty domain label".to_string(),
            });
        }

        Ok(Self {
            devcontainer_image: optional_env("DOCKYARD_DEVCONTAINER_IMAGE")?
                .unwrap_or(defaults.devcontainer_image),
            domain_suffix,
            host_ip: optional_env("DOCKYARD_HOST_IP")?.unwrap_or(defaults.host_ip),
            hosts_helper: optional_env("DOCKYARD_HOSTS_HELPER")?.map(PathBuf::from),
            registry_path: optional_env("DOCKYARD_REGISTRY_PATH")?
                .map(PathBuf::from)
                .unwrap_or(defaults.registry_path),
        })
    }
}
