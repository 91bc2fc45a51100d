//! Crate-level error types.

use thiserror::Error;

use crate::engine::EngineError;

/// Result type for session lifecycle operations.
pub type SpawnResult<T> = Result<T, SpawnError>;

/// Static configuration problems, detected before any workload is created.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The container spec has no mounts list at all.
    #[error("container spec has no mounts list; configure `container.mounts` (an empty list is allowed)")]
    MissingMounts,

    /// The hub API URL is not of the form `scheme://host:port/...`.
    #[error("malformed hub API URL '{0}': expected scheme://host:port[/path]")]
    MalformedHubUrl(String),

    /// A derived name is not usable as a service name.
    #[error("invalid session name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}

/// Errors surfaced by [`crate::lifecycle::SessionBackend`] operations.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl SpawnError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, SpawnError::Configuration(_))
    }
}
