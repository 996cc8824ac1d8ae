use std::time::Duration;

use crate::config::helpers::parse_optional_env;
use crate::error::ConfigError;

/// Event bus timing.
#[derive(Debug, Clone)]
pub struct EventsConfig {
    /// Window in which state-changing events coalesce into one bulk invalidation.
    pub debounce: Duration,
    /// First reconnect delay.
    pub backoff_initial: Duration,
    /// Reconnect delay ceiling.
    pub backoff_max: Duration,
    /// How long a fresh event stream must stay up (or deliver an event)
    /// before the connection counts as established and backoff resets.
    pub stable_after: Duration,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            backoff_initial: Duration::from_millis(1000),
            backoff_max: Duration::from_millis(30_000),
            stable_after: Duration::from_millis(1000),
        }
    }
}

impl EventsConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let ms = |d: Duration| d.as_millis() as u64;

        let backoff_initial = Duration::from_millis(parse_optional_env(
            "DOCKYARD_EVENTS_BACKOFF_INITIAL_MS",
            ms(defaults.backoff_initial),
        )?);
        let backoff_max = Duration::from_millis(parse_optional_env(
            "DOCKYARD_EVENTS_BACKOFF_MAX_MS",
            ms(defaults.backoff_max),
        )?);
        if backoff_initial.is_zero() || backoff_initial > backoff_max {
            return Err(ConfigError::InvalidValue {
                key: "DOCKYARD_EVENTS_BACKOFF_INITIAL_MS".to_string(),
                message: "must be non-zero and not larger than the backoff ceiling".to_string(),
            });
        }

        Ok(Self {
            debounce: Duration::from_millis(parse_optional_env(
                "DOCKYARD_EVENTS_DEBOUNCE_MS",
                ms(defaults.debounce),
            )?),
            backoff_initial,
            backoff_max,
            stable_after: Duration::from_millis(parse_optional_env(
                "DOCKYARD_EVENTS_STABLE_MS",
                ms(defaults.stable_after),
            )?),
        })
    }
}
