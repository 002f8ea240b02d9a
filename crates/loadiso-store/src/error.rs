//! Error types for the relational backend

use loadiso_core::{RouterError, SessionError};

/// Relational backend errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Unknown role or wrong password
    #[error("password authentication failed for user \"{0}\"")]
    AuthenticationFailed(String),

    /// Every pooled connection is checked out
    #[error("connection pool '{pool}' exhausted (max: {max})")]
    PoolExhausted {
        /// Pool name
        pool: String,
        /// Pool capacity
        max: usize,
    },

    /// The session behind the connection is gone
    #[error("connection {0} has been closed")]
    ConnectionClosed(u64),

    /// A row was rejected by the row-level security policy
    #[error("ERROR: new row violates row-level security policy for table \"{table}\"")]
    PolicyViolation {
        /// Table the row targeted
        table: String,
    },

    /// A statement affected a different number of rows than expected
    #[error("Unexpected row count (expected row count {expected} but was {actual}) [{statement}]")]
    UnexpectedRowCount {
        /// Rows expected
        expected: u64,
        /// Rows affected
        actual: u64,
        /// Statement text
        statement: String,
    },

    /// A unique constraint was violated
    #[error("duplicate key value violates unique constraint \"{0}\"")]
    UniqueViolation(String),

    /// Datasource wiring failed
    #[error("datasource misconfigured: {0}")]
    Misconfigured(#[from] RouterError),
}

impl StoreError {
    /// Whether the server-side policy refused the operation
    #[inline]
    #[must_use]
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. })
    }

    /// Whether a write silently matched no rows
    #[inline]
    #[must_use]
    pub fn is_unexpected_row_count(&self) -> bool {
        matches!(self, Self::UnexpectedRowCount { .. })
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConnectionClosed(id) => Self::SessionClosed(id.to_string()),
            StoreError::PoolExhausted { .. } | StoreError::AuthenticationFailed(_) => {
                Self::AcquisitionFailed(err.to_string())
            }
            other => Self::CommandFailed(other.to_string()),
        }
    }
}
