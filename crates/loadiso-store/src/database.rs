//! In-memory relational database with role-based row policy
//!
//! Stands in for the shared Postgres instance. One table, `t_users`, is
//! partitioned by its `is_test` column; which partition a session can see and
//! write is decided by the session's role and, for policy-by-setting roles, by
//! the session setting the session marker stamps.

use crate::error::StoreError;
use crate::model::{NewUser, User};
use crate::session::Session;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Table holding users
pub const USERS_TABLE: &str = "t_users";

/// Session setting read by the policy of [`RowPolicy::SessionSetting`] roles
pub const TEST_MODE_SETTING: &str = "app.test_mode";

/// Role whose visibility follows [`TEST_MODE_SETTING`]
pub const APP_USER: &str = "app_user";
/// Role restricted to production rows
pub const APP_REAL_USER: &str = "app_real_user";
/// Role restricted to load-test rows
pub const APP_TEST_USER: &str = "app_test_user";
/// Superuser for seeding and inspection
pub const DB_ADMIN_USER: &str = "db_admin_user";

/// Row visibility rule attached to a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowPolicy {
    /// Superuser: sees and writes every row, may delete
    Bypass,
    /// Only `is_test = false`
    RealOnly,
    /// Only `is_test = true`
    TestOnly,
    /// `is_test = (current_setting(setting) = 'true')`
    SessionSetting(String),
}

/// Login role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDefinition {
    /// Role name, reported by `current_user`
    pub name: String,
    /// Password
    pub password: String,
    /// Row policy
    pub policy: RowPolicy,
}

impl RoleDefinition {
    /// Create role definition
    #[must_use]
    pub fn new(name: impl Into<String>, password: impl Into<String>, policy: RowPolicy) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            policy,
        }
    }
}

/// Partition a session may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Partition {
    All,
    Only { is_test: bool },
}

impl Partition {
    fn admits(self, is_test: bool) -> bool {
        match self {
            Self::All => true,
            Self::Only { is_test: allowed } => allowed == is_test,
        }
    }
}

/// Shared database instance
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    roles: DashMap<String, Arc<RoleDefinition>>,
    users: RwLock<BTreeMap<i64, User>>,
    sequence: AtomicI64,
    sessions: AtomicU64,
}

impl InMemoryDatabase {
    /// Create empty database
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Database with the four isolation roles, all sharing `password`
    #[must_use]
    pub fn with_isolation_roles(password: &str) -> Self {
        let db = Self::new();
        db.create_role(RoleDefinition::new(DB_ADMIN_USER, password, RowPolicy::Bypass));
        db.create_role(RoleDefinition::new(APP_REAL_USER, password, RowPolicy::RealOnly));
        db.create_role(RoleDefinition::new(APP_TEST_USER, password, RowPolicy::TestOnly));
        db.create_role(RoleDefinition::new(
            APP_USER,
            password,
            RowPolicy::SessionSetting(TEST_MODE_SETTING.to_string()),
        ));
        db
    }

    /// Create or replace a role
    pub fn create_role(&self, role: RoleDefinition) {
        tracing::debug!(role = %role.name, policy = ?role.policy, "creating role");
        self.roles.insert(role.name.clone(), Arc::new(role));
    }

    /// Authenticate a login
    ///
    /// # Errors
    /// - `StoreError::AuthenticationFailed` for unknown roles or wrong passwords
    pub fn authenticate(&self, name: &str, password: &str) -> Result<Arc<RoleDefinition>, StoreError> {
        self.roles
            .get(name)
            .filter(|role| role.password == password)
            .map(|role| Arc::clone(role.value()))
            .ok_or_else(|| StoreError::AuthenticationFailed(name.to_string()))
    }

    /// Open a server session for an authenticated role
    pub(crate) fn open_session(&self, role: Arc<RoleDefinition>) -> Session {
        let id = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        Session::open(id, role)
    }

    /// Total rows, ignoring policy
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.users.read().len()
    }

    fn partition(session: &Session) -> Partition {
        match &session.role().policy {
            RowPolicy::Bypass => Partition::All,
            RowPolicy::RealOnly => Partition::Only { is_test: false },
            RowPolicy::TestOnly => Partition::Only { is_test: true },
            RowPolicy::SessionSetting(setting) => Partition::Only {
                is_test: session.setting(setting).as_deref() == Some("true"),
            },
        }
    }

    pub(crate) fn insert_user(&self, session: &Session, new: NewUser) -> Result<User, StoreError> {
        if !Self::partition(session).admits(new.is_test) {
            return Err(StoreError::PolicyViolation {
                table: USERS_TABLE.to_string(),
            });
        }

        let mut users = self.users.write();
        if users
            .values()
            .any(|u| u.email == new.email && u.is_test == new.is_test)
        {
            return Err(StoreError::UniqueViolation("t_users_email_key".to_string()));
        }

        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let user = User {
            id,
            username: new.username,
            password: new.password,
            email: new.email,
            is_test: new.is_test,
        };
        users.insert(id, user.clone());
        Ok(user)
    }

    pub(crate) fn select_users(&self, session: &Session) -> Vec<User> {
        let partition = Self::partition(session);
        self.users
            .read()
            .values()
            .filter(|u| partition.admits(u.is_test))
            .cloned()
            .collect()
    }

    pub(crate) fn select_user(&self, session: &Session, id: i64) -> Option<User> {
        let partition = Self::partition(session);
        self.users
            .read()
            .get(&id)
            .filter(|u| partition.admits(u.is_test))
            .cloned()
    }

    pub(crate) fn select_user_by_email(&self, session: &Session, email: &str) -> Option<User> {
        let partition = Self::partition(session);
        self.users
            .read()
            .values()
            .find(|u| u.email == email && partition.admits(u.is_test))
            .cloned()
    }

    /// Returns affected rows; rows outside the partition are not matched
    pub(crate) fn update_user(&self, session: &Session, user: &User) -> Result<u64, StoreError> {
        let partition = Self::partition(session);
        let mut users = self.users.write();
        let Some(existing) = users.get_mut(&user.id).filter(|u| partition.admits(u.is_test)) else {
            return Ok(0);
        };
        if !partition.admits(user.is_test) {
            return Err(StoreError::PolicyViolation {
                table: USERS_TABLE.to_string(),
            });
        }
        existing.clone_from(user);
        Ok(1)
    }

    /// Application roles have no delete policy, so only the superuser deletes
    pub(crate) fn delete_user(&self, session: &Session, id: i64) -> u64 {
        if Self::partition(session) != Partition::All {
            return 0;
        }
        u64::from(self.users.write().remove(&id).is_some())
    }
}
