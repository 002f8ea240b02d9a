//! Error types for the classification core
//!
//! Classification itself never fails. The errors here cover:
//! - Router construction (startup-time, fatal)
//! - Session marker commands against the bound relational session
//! - Ingress gate outcomes that are not the handler's own result

use crate::router::{BackendKey, ResourceKind};

/// Router construction errors
///
/// Routers never fail at call time for structural reasons; every variant here is
/// raised while wiring the application.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// One of the two backends was never bound
    #[error("{resource} router is missing its {key} backend")]
    MissingBackend {
        /// Resource the router serves
        resource: ResourceKind,
        /// Backend slot left empty
        key: BackendKey,
    },
}

/// Errors raised by a [`SessionMarker`](crate::session::SessionMarker)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No connection could be acquired to carry the marker
    #[error("could not acquire session: {0}")]
    AcquisitionFailed(String),

    /// The session was invalidated underneath the marker
    #[error("session {0} is closed")]
    SessionClosed(String),

    /// The server rejected the session command
    #[error("session command failed: {0}")]
    CommandFailed(String),
}

impl SessionError {
    /// Whether the session is already gone
    #[inline]
    #[must_use]
    pub fn is_session_gone(&self) -> bool {
        matches!(self, Self::SessionClosed(_))
    }
}

/// Ingress gate errors
///
/// The handler's own success or failure is returned untouched inside `Ok`; these
/// variants only describe what the gate itself could not do.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The session marker could not be stamped before the handler ran
    #[error("failed to mark session for test traffic: {0}")]
    SessionMarking(#[from] SessionError),

    /// The downstream handler did not finish in time
    #[error("request handler timed out after {duration_ms}ms")]
    Timeout {
        /// Configured limit in milliseconds
        duration_ms: u64,
    },
}

impl GateError {
    /// Check if the request never reached the handler
    #[inline]
    #[must_use]
    pub fn rejected_before_handler(&self) -> bool {
        matches!(self, Self::SessionMarking(_))
    }
}
