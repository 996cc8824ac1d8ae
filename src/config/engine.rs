use std::time::Duration;

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;

/// Container engine settings shared by every component.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bridge network every managed container is attached to.
    pub network: String,
    /// Upper bound for a single engine call made on a best-effort path.
    pub call_timeout: Duration,
    /// Per sub-call timeout for stats aggregation (info, list, per-container stats).
    pub stats_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: "dockyard_network".to_string(),
            call_timeout: Duration::from_secs(10),
            stats_timeout: Duration::from_millis(3000),
        }
    }
}

impl EngineConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            network: optional_env("DOCKYARD_NETWORK")?.unwrap_or(defaults.network),
            call_timeout: Duration::from_secs(parse_optional_env(
                "DOCKYARD_ENGINE_TIMEOUT_SECS",
                defaults.call_timeout.as_secs(),
            )?),
            stats_timeout: Duration::from_millis(parse_optional_env(
                "DOCKYARD_STATS_TIMEOUT_MS",
                defaults.stats_timeout.as_millis() as u64,
            )?),
        })
    }
}
