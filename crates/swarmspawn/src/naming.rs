//! Deterministic names for session workloads.
//!
//! Names are never random: a restarted controller finds an existing service
//! again by recomputing its name from the user identity.

/// Default service name prefix.
pub const DEFAULT_NAME_PREFIX: &str = "notebook";

/// Derives service and volume names from a user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingPolicy {
    prefix: String,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_PREFIX)
    }
}

impl NamingPolicy {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Service name for the user: `<prefix>-<user>`.
    pub fn session_name(&self, user: &str) -> String {
        format!("{}-{}", self.prefix, user)
    }

    /// Source name for the session's mounts.
    ///
    /// Equal to the session name, so a re-created service reattaches the same
    /// volume.
    pub fn mount_source_name(&self, user: &str) -> String {
        self.session_name(user)
    }
}
