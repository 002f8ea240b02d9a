//! Session marker backed by [`SessionBoundDataSource`]

use crate::database::TEST_MODE_SETTING;
use crate::datasource::{DataSource, SessionBoundDataSource};
use loadiso_core::{ClassificationContext, MarkerState, SessionError, SessionMarker};
use std::sync::Arc;

/// Stamps `app.test_mode` on the session bound to a unit of execution
///
/// `mark_test` acquires and binds a session when none is bound, so the session
/// is always checked out after classification. `mark_production` only touches an
/// already bound session and never acquires one.
#[derive(Debug, Clone)]
pub struct PoolSessionMarker {
    datasource: Arc<SessionBoundDataSource>,
}

impl PoolSessionMarker {
    /// Create marker over `datasource`
    #[inline]
    #[must_use]
    pub fn new(datasource: Arc<SessionBoundDataSource>) -> Self {
        Self { datasource }
    }
}

impl SessionMarker for PoolSessionMarker {
    fn mark_test(&self, ctx: &ClassificationContext) -> Result<(), SessionError> {
        let conn = self.datasource.bind(ctx)?;
        conn.set_setting(TEST_MODE_SETTING, "true")?;
        tracing::debug!(unit = %ctx.unit(), session = conn.session_id(), "session marked test");
        Ok(())
    }

    fn mark_production(&self, ctx: &ClassificationContext) -> Result<(), SessionError> {
        if let Some(conn) = self.datasource.bound(ctx) {
            conn.set_setting(TEST_MODE_SETTING, "false")?;
        }
        Ok(())
    }

    fn clear(&self, ctx: &ClassificationContext) -> Result<(), SessionError> {
        let Some(conn) = self.datasource.unbind(ctx) else {
            return Ok(());
        };
        let reset = conn.set_setting(TEST_MODE_SETTING, "false");
        let session = conn.session_id();
        drop(conn);
        tracing::debug!(unit = %ctx.unit(), session, "session released");
        reset.map_err(SessionError::from)
    }

    fn state(&self, ctx: &ClassificationContext) -> MarkerState {
        let marked = self
            .datasource
            .bound(ctx)
            .and_then(|conn| conn.current_setting(TEST_MODE_SETTING).ok().flatten())
            .is_some_and(|value| value == "true");
        if marked {
            MarkerState::MarkedTest
        } else {
            MarkerState::Unmarked
        }
    }

    fn current_effective_identity(
        &self,
        ctx: &ClassificationContext,
    ) -> Result<String, SessionError> {
        let conn = self.datasource.connection(ctx)?;
        Ok(conn.current_user()?)
    }
}
