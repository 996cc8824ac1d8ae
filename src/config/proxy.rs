use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;

/// Edge reverse-proxy settings.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Name of the proxy's own container.
    pub container_name: String,
    /// Where the generated configuration lives inside the proxy container.
    pub config_path: String,
    /// Domain of the bootstrap block that triggers local certificate issuance.
    pub bootstrap_domain: String,
    /// Port every project container serves on inside the network.
    pub project_port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            container_name: "dockyard_caddy".to_string(),
            config_path: "/etc/caddy/Caddyfile".to_string(),
            bootstrap_domain: "localhost".to_string(),
            project_port: 8080,
        }
    }
}

impl ProxyConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config_path =
            optional_env("DOCKYARD_PROXY_CONFIG_PATH")?.unwrap_or(defaults.config_path);
        if !config_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "DOCKYARD_PROXY_CONFIG_PATH".to_string(),
                message: "must be an absolute path inside the proxy container".to_string(),
            });
        }

        Ok(Self {
            container_name: optional_env("DOCKYARD_PROXY_CONTAINER")?
                .unwrap_or(defaults.container_name),
            config_path,
            bootstrap_domain: normalize_domain(
                &optional_env("DOCKYARD_PROXY_BOOTSTRAP_DOMAIN")?
                    .unwrap_or(defaults.bootstrap_domain),
            ),
            project_port: parse_optional_env("DOCKYARD_PROJECT_PORT", defaults.project_port)?,
        })
    }
}

/// Domains compare trimmed and lowercase.
pub(crate) fn normalize_domain(domain: &str) -> String {
    domain.trim().to_ascii_lowercase()
}
