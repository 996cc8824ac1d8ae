use std::time::Duration;

use crate::config::helpers::{optional_env, parse_optional_env, parse_port_range};
use crate::error::ConfigError;

/// Host port allocation and discovery settings.
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// How far above a colliding desired port the resolver scans.
    pub scan_limit: u16,
    /// Optional fixed pool. When set, colliding ports are drawn from here
    /// instead of scanning upward.
    pub pool: Option<(u16, u16)>,
    /// Dynamic range swept by forwarded-port discovery (inclusive).
    pub discovery_range: (u16, u16),
    /// Per-port identity probe timeout.
    pub probe_timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            scan_limit: 1000,
            pool: None,
            discovery_range: (49152, 49352),
            probe_timeout: Duration::from_millis(2000),
        }
    }
}

impl PortConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let pool = optional_env("DOCKYARD_PORT_POOL")?
            .map(|raw| parse_port_range("DOCKYARD_PORT_POOL", &raw))
            .transpose()?;
        let discovery_range = optional_env("DOCKYARD_DISCOVERY_RANGE")?
            .map(|raw| parse_port_range("DOCKYARD_DISCOVERY_RANGE", &raw))
            .transpose()?
            .unwrap_or(defaults.discovery_range);

        Ok(Self {
            scan_limit: parse_optional_env("DOCKYARD_PORT_SCAN_LIMIT", defaults.scan_limit)?,
            pool,
            discovery_range,
            probe_timeout: Duration::from_millis(parse_optional_env(
                "DOCKYARD_PROBE_TIMEOUT_MS",
                defaults.probe_timeout.as_millis() as u64,
            )?),
        })
    }
}
