//! Application error types

use loadiso_cache::CacheError;
use loadiso_core::{GateError, RouterError};
use loadiso_store::StoreError;
use loadiso_stream::StreamError;
use std::path::PathBuf;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {0}: {1}")]
    ReadFailed(PathBuf, #[source] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config file {0}: {1}")]
    ParseFailed(PathBuf, #[source] toml::de::Error),

    /// Inline TOML is not valid for this schema
    #[error("failed to parse config: {0}")]
    InvalidToml(#[from] toml::de::Error),

    /// Config could not be rendered
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    /// A startup invariant does not hold
    #[error("invalid configuration: {0}")]
    ValidationFailed(String),
}

/// Errors of user operations
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Relational backend failure, including policy rejections
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cache backend failure
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ServiceError {
    /// Whether the row policy refused the operation
    #[must_use]
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_policy_violation())
    }

    /// Whether a write matched no rows
    #[must_use]
    pub fn is_unexpected_row_count(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_unexpected_row_count())
    }
}

/// Startup and request-handling errors
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Router built without both backends
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Relational backend unavailable
    #[error("datasource: {0}")]
    Store(#[from] StoreError),

    /// Cache backend unavailable
    #[error("cache: {0}")]
    Cache(#[from] CacheError),

    /// Stream backend unavailable
    #[error("stream: {0}")]
    Stream(#[from] StreamError),

    /// Request rejected at the ingress gate
    #[error(transparent)]
    Gate(#[from] GateError),
}
