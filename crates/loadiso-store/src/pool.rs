//! Connection pool per login role
//!
//! Connections are handed out as cheap clones of one checkout; the session goes
//! back to the pool (settings reset) when the last clone is dropped. Sessions
//! the server closed are discarded instead of being reused.

use crate::database::{InMemoryDatabase, RoleDefinition};
use crate::error::StoreError;
use crate::model::{NewUser, User};
use crate::session::Session;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;

/// Default pool capacity
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Source of connections for one backend
pub trait ConnectionProvider: Send + Sync + Debug {
    /// Check out a connection
    ///
    /// # Errors
    /// - `StoreError::PoolExhausted` if every connection is in use
    fn acquire(&self) -> Result<Connection, StoreError>;

    /// Pool name, for logs
    fn name(&self) -> &str;

    /// Login role of the pooled sessions
    fn role(&self) -> &str;
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions opened
    pub total_created: usize,
    /// Checked-out connections
    pub active_count: usize,
    /// Idle sessions
    pub available_count: usize,
    /// Checkouts served from idle sessions
    pub total_reused: usize,
    /// Closed sessions dropped on return
    pub total_discarded: usize,
}

#[derive(Debug)]
struct PoolInner {
    name: String,
    db: Arc<InMemoryDatabase>,
    role: Arc<RoleDefinition>,
    max_size: usize,
    /// Idle sessions (LIFO)
    available: Mutex<Vec<Arc<Session>>>,
    active: DashMap<u64, Arc<Session>>,
    stats: Mutex<PoolStats>,
}

impl PoolInner {
    fn release(&self, session: Arc<Session>) {
        self.active.remove(&session.id());

        let mut available = self.available.lock();
        let mut stats = self.stats.lock();
        if session.is_closed() {
            tracing::debug!(pool = %self.name, session = session.id(), "discarding closed session");
            stats.total_discarded += 1;
        } else {
            session.reset();
            available.push(session);
        }
        stats.available_count = available.len();
        stats.active_count = self.active.len();
    }
}

/// Pool of sessions authenticated as one role
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Authenticate `username` and create a pool for it
    ///
    /// # Errors
    /// - `StoreError::AuthenticationFailed` if the credentials are rejected
    pub fn connect(
        db: Arc<InMemoryDatabase>,
        username: &str,
        password: &str,
        max_size: usize,
    ) -> Result<Self, StoreError> {
        let role = db.authenticate(username, password)?;
        tracing::info!(pool = %username, max_size, "connection pool ready");
        Ok(Self {
            inner: Arc::new(PoolInner {
                name: username.to_string(),
                db,
                role,
                max_size,
                available: Mutex::new(Vec::new()),
                active: DashMap::new(),
                stats: Mutex::new(PoolStats::default()),
            }),
        })
    }

    /// Check out a connection (reuse or open)
    ///
    /// # Errors
    /// - `StoreError::PoolExhausted` if `max_size` connections are checked out
    pub fn acquire(&self) -> Result<Connection, StoreError> {
        let inner = &self.inner;
        let mut available = inner.available.lock();

        let session = if let Some(session) = available.pop() {
            inner.stats.lock().total_reused += 1;
            session
        } else {
            if inner.active.len() >= inner.max_size {
                return Err(StoreError::PoolExhausted {
                    pool: inner.name.clone(),
                    max: inner.max_size,
                });
            }
            inner.stats.lock().total_created += 1;
            Arc::new(inner.db.open_session(Arc::clone(&inner.role)))
        };

        inner.active.insert(session.id(), Arc::clone(&session));
        let mut stats = inner.stats.lock();
        stats.available_count = available.len();
        stats.active_count = inner.active.len();
        drop(stats);
        drop(available);

        Ok(Connection {
            inner: Arc::new(ConnectionInner {
                session,
                pool: Arc::clone(inner),
            }),
        })
    }

    /// Terminate a checked-out session server-side (`pg_terminate_backend`)
    ///
    /// Returns whether a session was terminated.
    pub fn terminate(&self, session_id: u64) -> bool {
        self.inner
            .active
            .get(&session_id)
            .map(|session| session.close())
            .is_some()
    }

    /// Pool statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.stats.lock().clone()
    }

    /// Checked-out connections
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    /// Capacity
    #[inline]
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }
}

impl ConnectionProvider for ConnectionPool {
    fn acquire(&self) -> Result<Connection, StoreError> {
        ConnectionPool::acquire(self)
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn role(&self) -> &str {
        &self.inner.role.name
    }
}

#[derive(Debug)]
struct ConnectionInner {
    session: Arc<Session>,
    pool: Arc<PoolInner>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.pool.release(Arc::clone(&self.session));
    }
}

/// Checked-out connection
///
/// Clones share the checkout. Every statement fails with
/// `StoreError::ConnectionClosed` once the server closed the session.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    fn session(&self) -> Result<&Session, StoreError> {
        let session = &self.inner.session;
        if session.is_closed() {
            return Err(StoreError::ConnectionClosed(session.id()));
        }
        Ok(session)
    }

    fn db(&self) -> &InMemoryDatabase {
        &self.inner.pool.db
    }

    /// Server session id
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.inner.session.id()
    }

    /// Name of the pool the connection came from
    #[inline]
    #[must_use]
    pub fn pool_name(&self) -> &str {
        &self.inner.pool.name
    }

    /// Whether the server closed the session
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.session.is_closed()
    }

    /// Whether both handles share one checkout
    #[inline]
    #[must_use]
    pub fn same_checkout(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// `SET name = 'value'`
    ///
    /// # Errors
    /// - `StoreError::ConnectionClosed` if the session is gone
    pub fn set_setting(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.session()?.set(name, value);
        Ok(())
    }

    /// `RESET ALL`
    ///
    /// # Errors
    /// - `StoreError::ConnectionClosed` if the session is gone
    pub fn reset_settings(&self) -> Result<(), StoreError> {
        self.session()?.reset();
        Ok(())
    }

    /// `SELECT current_setting(name, true)`
    ///
    /// # Errors
    /// - `StoreError::ConnectionClosed` if the session is gone
    pub fn current_setting(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.session()?.setting(name))
    }

    /// `SELECT current_user`
    ///
    /// # Errors
    /// - `StoreError::ConnectionClosed` if the session is gone
    pub fn current_user(&self) -> Result<String, StoreError> {
        Ok(self.session()?.role().name.clone())
    }

    pub(crate) fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let session = self.session()?;
        self.db().insert_user(session, user)
    }

    pub(crate) fn select_users(&self) -> Result<Vec<User>, StoreError> {
        let session = self.session()?;
        Ok(self.db().select_users(session))
    }

    pub(crate) fn select_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let session = self.session()?;
        Ok(self.db().select_user(session, id))
    }

    pub(crate) fn select_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let session = self.session()?;
        Ok(self.db().select_user_by_email(session, email))
    }

    pub(crate) fn update_user(&self, user: &User) -> Result<u64, StoreError> {
        let session = self.session()?;
        self.db().update_user(session, user)
    }

    pub(crate) fn delete_user(&self, id: i64) -> Result<u64, StoreError> {
        let session = self.session()?;
        Ok(self.db().delete_user(session, id))
    }
}
