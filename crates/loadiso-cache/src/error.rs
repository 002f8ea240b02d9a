//! Error types for the cache backend

use loadiso_core::RouterError;

/// Cache errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Unknown user or wrong password
    #[error("WRONGPASS invalid username-password pair or user is disabled (user: {0})")]
    AuthenticationFailed(String),

    /// Command touched a key outside the user's ACL
    #[error("NOPERM User {user} has no permissions to access the '{key}' key")]
    NoPermission {
        /// Authenticated user
        user: String,
        /// Key or pattern refused
        key: String,
    },

    /// Value could not be (de)serialized
    #[error("cache value serialization failed: {0}")]
    Serialization(String),

    /// Manager configuration rejected at startup
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// Router wiring failed
    #[error("cache misconfigured: {0}")]
    Misconfigured(#[from] RouterError),
}

impl CacheError {
    /// Whether the keyspace ACL refused the command
    #[inline]
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::NoPermission { .. })
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
