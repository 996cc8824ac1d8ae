//! Error types for dockyard.
//!
//! Errors are layered the same way the components are. The engine seam
//! produces [`EngineError`]; the lifecycle manager and the proxy
//! synchronizer translate those into [`LifecycleError`] so nothing above
//! them ever sees a raw engine-client error.

use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Container lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Port resolution error: {0}")]
    Port(#[from] PortError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Entity error: {0}")]
    Entity(#[from] EntityError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors produced at the container engine boundary.
///
/// These are already classified: callers branch on the variant, never on
/// the message text.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The container, volume or network does not exist.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// The resource exists but is in a state that forbids the operation
    /// (name already taken, volume still attached, ...).
    #[error("Conflict on {resource}: {reason}")]
    Conflict { resource: String, reason: String },

    /// The engine reported that nothing changed (already started/stopped).
    #[error("{resource} already in requested state")]
    NotModified { resource: String },

    /// The engine socket could not be reached.
    #[error("Container engine unavailable: {reason}")]
    Unavailable { reason: String },

    /// Any other engine-side failure.
    #[error("Container engine error: {reason}")]
    Api { reason: String },
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors surfaced by the container lifecycle manager.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Engine unreachable. Edges turn this into a boolean status.
    #[error("Container engine unavailable: {reason}")]
    Unavailable { reason: String },

    /// Resource still in use (e.g. a volume attached to a container). The
    /// caller decides whether to force or abort.
    #[error("{resource} is in use: {reason}")]
    InUse { resource: String, reason: String },

    /// No free host port could be found for a desired port.
    #[error("No free host port available for desired port {desired}")]
    PortExhausted { desired: u16 },

    /// Two mappings in one container spec target the same container port.
    #[error("Container '{name}' maps container port {container_port} more than once")]
    DuplicatePort { name: String, container_port: u16 },

    #[error("Failed to create container '{name}': {source}")]
    Create {
        name: String,
        #[source]
        source: EngineError,
    },

    #[error("Failed to {op} '{target}': {source}")]
    Operation {
        op: &'static str,
        target: String,
        #[source]
        source: EngineError,
    },
}

impl LifecycleError {
    /// Classify an engine failure for a named operation.
    pub(crate) fn from_engine(op: &'static str, target: &str, err: EngineError) -> Self {
        match err {
            EngineError::Unavailable { reason } => Self::Unavailable { reason },
            EngineError::Conflict { resource, reason } => Self::InUse { resource, reason },
            other => Self::Operation {
                op,
                target: target.to_string(),
                source: other,
            },
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Port resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("No free host port available for desired port {desired}")]
    Exhausted { desired: u16 },

    #[error("Invalid port range {start}-{end}")]
    InvalidRange { start: u16, end: u16 },
}

impl From<PortError> for LifecycleError {
    fn from(e: PortError) -> Self {
        match e {
            PortError::Exhausted { desired } => Self::PortExhausted { desired },
            PortError::InvalidRange { start, .. } => Self::PortExhausted { desired: start },
        }
    }
}

/// Entity registry (persistence collaborator) errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Registry file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
}

/// Errors from project/service state managers.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("Unknown service '{id}'")]
    UnknownService { id: String },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_in_use() {
        let err = LifecycleError::from_engine(
            "remove volume",
            "demo_data",
            EngineError::Conflict {
                resource: "volume demo_data".to_string(),
                reason: "volume is in use".to_string(),
            },
        );
        assert!(matches!(err, LifecycleError::InUse { .. }));
    }

    #[test]
    fn test_unavailable_passes_through() {
        let err = LifecycleError::from_engine(
            "start",
            "demo",
            EngineError::Unavailable {
                reason: "connection refused".to_string(),
            },
        );
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_port_error_converts_with_desired_port() {
        let err: LifecycleError = PortError::Exhausted { desired: 3306 }.into();
        assert!(matches!(err, LifecycleError::PortExhausted { desired: 3306 }));
        assert!(err.to_string().contains("3306"));
    }
}
