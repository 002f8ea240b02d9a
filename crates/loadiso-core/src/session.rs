//! Session marker contract
//!
//! A session marker stamps the classification onto the relational session bound
//! to a unit of execution, so that server-side row policy can see it without the
//! application passing it along.
//!
//! States: `Unmarked -> MarkedTest -> Unmarked`. Production is the absence of
//! the test marker, never a marked state of its own.
//!
//! Ordering hazard: the marker only affects statements issued on the bound
//! session after it was set. A unit of work that checked out its own connection
//! before classification keeps that connection, unmarked, until it ends.

use crate::context::ClassificationContext;
use crate::error::SessionError;
use std::fmt::Debug;

/// Marker state of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MarkerState {
    /// No test marker (production)
    #[default]
    Unmarked,
    /// Test marker set
    MarkedTest,
}

/// Bridge between in-process classification and server-side session state
///
/// All commands are idempotent and scoped to the session bound to `ctx`'s unit.
pub trait SessionMarker: Send + Sync + Debug {
    /// Set the test marker, acquiring and binding a session if none is bound
    ///
    /// # Errors
    /// - `SessionError::AcquisitionFailed` if no session can be bound
    /// - `SessionError::CommandFailed` if the server rejects the command
    fn mark_test(&self, ctx: &ClassificationContext) -> Result<(), SessionError>;

    /// Drop the test marker on the bound session, if any
    ///
    /// # Errors
    /// - `SessionError::SessionClosed` if the bound session is gone
    fn mark_production(&self, ctx: &ClassificationContext) -> Result<(), SessionError>;

    /// Drop the marker and release the bound session
    ///
    /// The release is attempted even when resetting the marker fails.
    ///
    /// # Errors
    /// - `SessionError::SessionClosed` if the bound session is already gone
    fn clear(&self, ctx: &ClassificationContext) -> Result<(), SessionError>;

    /// Marker state of the session bound to `ctx`
    fn state(&self, ctx: &ClassificationContext) -> MarkerState;

    /// Identity the bound (or a fresh) session operates as; verification only
    ///
    /// # Errors
    /// - `SessionError::AcquisitionFailed` if no session is available
    fn current_effective_identity(&self, ctx: &ClassificationContext)
        -> Result<String, SessionError>;
}
