//! Datasource strategies
//!
//! Two ways of getting a connection that matches the current classification:
//! - [`RoutingDataSource`]: picks the `REAL` or `TEST` pool per acquisition;
//!   the pools log in as different roles, so policy follows the credentials.
//! - [`SessionBoundDataSource`]: one pool for every request; the session marker
//!   binds a connection to the unit and stamps the classification on it.
//!
//! [`UnitOfWork`] pins a connection for its lifetime. Whatever backend and
//! identity it got at `begin` it keeps, even if classification changes later.

use crate::error::StoreError;
use crate::pool::{Connection, ConnectionPool, ConnectionProvider};
use crate::repository::UserRepository;
use dashmap::DashMap;
use loadiso_core::{
    BackendKey, BackendRouter, ClassificationContext, ResourceKind, RouterError, UnitId,
};
use std::fmt::Debug;
use std::sync::Arc;

/// Hands out connections for a unit of execution
pub trait DataSource: Send + Sync + Debug {
    /// Connection for `ctx`, decided at call time
    ///
    /// # Errors
    /// - `StoreError::PoolExhausted` if the selected pool is exhausted
    fn connection(&self, ctx: &ClassificationContext) -> Result<Connection, StoreError>;
}

/// Routes each acquisition to the `REAL` or `TEST` pool
#[derive(Debug, Clone)]
pub struct RoutingDataSource {
    router: BackendRouter<dyn ConnectionProvider>,
}

impl RoutingDataSource {
    /// Wrap an existing router
    #[inline]
    #[must_use]
    pub fn new(router: BackendRouter<dyn ConnectionProvider>) -> Self {
        Self { router }
    }

    /// Build from the two pools
    ///
    /// # Errors
    /// - `RouterError::MissingBackend` if a pool is missing
    pub fn from_pools(
        real: Option<ConnectionPool>,
        test: Option<ConnectionPool>,
    ) -> Result<Self, RouterError> {
        let mut builder = BackendRouter::<dyn ConnectionProvider>::builder(ResourceKind::Datasource);
        if let Some(real) = real {
            builder = builder.real(Arc::new(real));
        }
        if let Some(test) = test {
            builder = builder.test(Arc::new(test));
        }
        builder.build().map(Self::new)
    }

    /// Key the next acquisition would use
    #[inline]
    #[must_use]
    pub fn lookup_key(&self, ctx: &ClassificationContext) -> BackendKey {
        BackendKey::for_context(ctx)
    }

    /// Pool the next acquisition would use
    #[inline]
    #[must_use]
    pub fn resolve_backend(&self, ctx: &ClassificationContext) -> &Arc<dyn ConnectionProvider> {
        self.router.select(ctx)
    }

    /// Pool registered under `key`
    #[inline]
    #[must_use]
    pub fn backend(&self, key: BackendKey) -> &Arc<dyn ConnectionProvider> {
        self.router.backend(key)
    }
}

impl DataSource for RoutingDataSource {
    fn connection(&self, ctx: &ClassificationContext) -> Result<Connection, StoreError> {
        let provider = self.resolve_backend(ctx);
        tracing::debug!(
            unit = %ctx.unit(),
            pool = provider.name(),
            "acquiring routed connection"
        );
        provider.acquire()
    }
}

/// Single pool with connections bound to units of execution
#[derive(Debug)]
pub struct SessionBoundDataSource {
    pool: ConnectionPool,
    bound: DashMap<UnitId, Connection>,
}

impl SessionBoundDataSource {
    /// Create over `pool`
    #[must_use]
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            bound: DashMap::new(),
        }
    }

    /// Underlying pool
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Bind a connection to `ctx`'s unit, reusing one already bound
    ///
    /// # Errors
    /// - `StoreError::PoolExhausted` if no connection is available
    pub fn bind(&self, ctx: &ClassificationContext) -> Result<Connection, StoreError> {
        if let Some(existing) = self.bound(ctx) {
            return Ok(existing);
        }
        let conn = self.pool.acquire()?;
        tracing::debug!(unit = %ctx.unit(), session = conn.session_id(), "binding session");
        self.bound.insert(ctx.unit(), conn.clone());
        Ok(conn)
    }

    /// Connection bound to `ctx`'s unit
    #[must_use]
    pub fn bound(&self, ctx: &ClassificationContext) -> Option<Connection> {
        self.bound.get(&ctx.unit()).map(|c| c.value().clone())
    }

    /// Remove the binding; the connection returns to the pool once dropped
    pub fn unbind(&self, ctx: &ClassificationContext) -> Option<Connection> {
        self.bound.remove(&ctx.unit()).map(|(_, conn)| conn)
    }

    /// Units with a bound session
    #[inline]
    #[must_use]
    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }
}

impl DataSource for SessionBoundDataSource {
    fn connection(&self, ctx: &ClassificationContext) -> Result<Connection, StoreError> {
        match self.bound(ctx) {
            Some(conn) => Ok(conn),
            None => self.pool.acquire(),
        }
    }
}

/// Connection pinned for a sequence of statements
#[derive(Debug)]
pub struct UnitOfWork {
    unit: UnitId,
    connection: Connection,
}

impl UnitOfWork {
    /// Pin a connection for `ctx` now
    ///
    /// # Errors
    /// - `StoreError::PoolExhausted` if no connection is available
    pub fn begin(
        datasource: &(impl DataSource + ?Sized),
        ctx: &ClassificationContext,
    ) -> Result<Self, StoreError> {
        let connection = datasource.connection(ctx)?;
        tracing::debug!(
            unit = %ctx.unit(),
            pool = connection.pool_name(),
            session = connection.session_id(),
            "unit of work started"
        );
        Ok(Self {
            unit: ctx.unit(),
            connection,
        })
    }

    /// Unit of execution that began this work
    #[inline]
    #[must_use]
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Pinned connection
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Repository over the pinned connection
    #[inline]
    #[must_use]
    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.connection)
    }

    /// Identity the pinned connection operates as
    ///
    /// # Errors
    /// - `StoreError::ConnectionClosed` if the session is gone
    pub fn current_user(&self) -> Result<String, StoreError> {
        self.connection.current_user()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{InMemoryDatabase, RoleDefinition, RowPolicy, TEST_MODE_SETTING};
    use loadiso_core::context::testing;
    use loadiso_core::TrafficClassification;

    fn database() -> Arc<InMemoryDatabase> {
        let db = Arc::new(InMemoryDatabase::new());
        db.create_role(RoleDefinition::new("real", "pw", RowPolicy::RealOnly));
        db.create_role(RoleDefinition::new("test", "pw", RowPolicy::TestOnly));
        db.create_role(RoleDefinition::new(
            "app",
            "pw",
            RowPolicy::SessionSetting(TEST_MODE_SETTING.into()),
        ));
        db
    }

    fn routing(db: &Arc<InMemoryDatabase>) -> RoutingDataSource {
        RoutingDataSource::from_pools(
            Some(ConnectionPool::connect(Arc::clone(db), "real", "pw", 2).unwrap()),
            Some(ConnectionPool::connect(Arc::clone(db), "test", "pw", 2).unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn routing_follows_context_per_acquisition() {
        let ds = routing(&database());
        let ctx = ClassificationContext::new();

        assert_eq!(ds.lookup_key(&ctx), BackendKey::Real);
        assert_eq!(ds.connection(&ctx).unwrap().current_user().unwrap(), "real");

        testing::establish(&ctx, TrafficClassification::for_test("r1"));
        assert_eq!(ds.lookup_key(&ctx), BackendKey::Test);
        assert_eq!(ds.resolve_backend(&ctx).role(), "test");
        assert_eq!(ds.connection(&ctx).unwrap().current_user().unwrap(), "test");

        testing::clear(&ctx);
        assert_eq!(ds.connection(&ctx).unwrap().current_user().unwrap(), "real");
    }

    #[test]
    fn routing_requires_both_pools() {
        let db = database();
        let err = RoutingDataSource::from_pools(
            Some(ConnectionPool::connect(db, "real", "pw", 1).unwrap()),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RouterError::MissingBackend {
                key: BackendKey::Test,
                ..
            }
        ));
    }

    #[test]
    fn unit_of_work_keeps_its_backend() {
        let ds = routing(&database());
        let ctx = ClassificationContext::new();

        let work = UnitOfWork::begin(&ds, &ctx).unwrap();
        testing::establish(&ctx, TrafficClassification::for_test("late"));

        assert_eq!(work.current_user().unwrap(), "real");
        assert_eq!(work.unit(), ctx.unit());
    }

    #[test]
    fn session_bound_reuses_binding() {
        let db = database();
        let ds = SessionBoundDataSource::new(ConnectionPool::connect(db, "app", "pw", 2).unwrap());
        let ctx = ClassificationContext::new();

        let bound = ds.bind(&ctx).unwrap();
        assert!(ds.bind(&ctx).unwrap().same_checkout(&bound));
        assert!(ds.connection(&ctx).unwrap().same_checkout(&bound));

        let other = ClassificationContext::new();
        assert!(!ds.connection(&other).unwrap().same_checkout(&bound));

        drop(bound);
        assert!(ds.unbind(&ctx).is_some());
        assert_eq!(ds.bound_count(), 0);
        assert_eq!(ds.pool().active_count(), 0);
    }
}
