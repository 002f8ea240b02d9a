//! Shared keyspace with per-user key ACLs
//!
//! Stands in for the Redis instance both cache managers talk to. Values are JSON
//! documents, each entry carries its own time-to-live, and every command is
//! checked against the key patterns of the user the client authenticated as.

use crate::error::CacheError;
use dashmap::DashMap;
use moka::future::Cache;
use moka::Expiry;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default keyspace capacity
pub const DEFAULT_CAPACITY: u64 = 100_000;

/// Production cache user
pub const REAL_CACHE_USER: &str = "app_real_user";
/// Load-test cache user
pub const TEST_CACHE_USER: &str = "app_test_user";
/// Unrestricted cache user
pub const ADMIN_CACHE_USER: &str = "admin";

#[derive(Debug, Clone)]
struct Entry {
    value: Arc<Value>,
    ttl: Option<Duration>,
}

/// Expiry taken from the entry itself
struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// ACL entry of one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclUser {
    password: String,
    patterns: Vec<String>,
}

impl AclUser {
    /// User allowed on `patterns` (`prefix*` or exact keys)
    #[must_use]
    pub fn new(password: impl Into<String>, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            password: password.into(),
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    fn permits(&self, key: &str) -> bool {
        self.patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => pattern == key,
        })
    }
}

#[derive(Debug)]
struct KeyspaceInner {
    store: Cache<String, Entry>,
    users: DashMap<String, Arc<AclUser>>,
}

/// Shared keyspace
#[derive(Debug, Clone)]
pub struct Keyspace {
    inner: Arc<KeyspaceInner>,
}

impl Keyspace {
    /// Create empty keyspace holding at most `max_capacity` entries
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Arc::new(KeyspaceInner {
                store: Cache::builder()
                    .max_capacity(max_capacity)
                    .expire_after(EntryTtl)
                    .build(),
                users: DashMap::new(),
            }),
        }
    }

    /// Keyspace with the production, load-test and admin users
    #[must_use]
    pub fn with_isolation_acls(password: &str) -> Self {
        let keyspace = Self::default();
        keyspace.set_user(REAL_CACHE_USER, AclUser::new(password, ["real:*"]));
        keyspace.set_user(TEST_CACHE_USER, AclUser::new(password, ["test:*"]));
        keyspace.set_user(ADMIN_CACHE_USER, AclUser::new(password, ["*"]));
        keyspace
    }

    /// `ACL SETUSER`
    pub fn set_user(&self, name: &str, user: AclUser) {
        tracing::debug!(user = name, patterns = ?user.patterns, "setting cache ACL user");
        self.inner.users.insert(name.to_string(), Arc::new(user));
    }

    /// `AUTH user password`
    ///
    /// # Errors
    /// - `CacheError::AuthenticationFailed` for unknown users or wrong passwords
    pub fn connect(&self, user: &str, password: &str) -> Result<KeyspaceClient, CacheError> {
        let acl = self
            .inner
            .users
            .get(user)
            .filter(|acl| acl.password == password)
            .map(|acl| Arc::clone(acl.value()))
            .ok_or_else(|| CacheError::AuthenticationFailed(user.to_string()))?;
        Ok(KeyspaceClient {
            inner: Arc::clone(&self.inner),
            user: user.to_string(),
            acl,
        })
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Connection authenticated as one ACL user
#[derive(Debug, Clone)]
pub struct KeyspaceClient {
    inner: Arc<KeyspaceInner>,
    user: String,
    acl: Arc<AclUser>,
}

impl KeyspaceClient {
    /// Authenticated user
    #[inline]
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    fn check(&self, key: &str) -> Result<(), CacheError> {
        if self.acl.permits(key) {
            Ok(())
        } else {
            Err(CacheError::NoPermission {
                user: self.user.clone(),
                key: key.to_string(),
            })
        }
    }

    /// `GET key`
    ///
    /// # Errors
    /// - `CacheError::NoPermission` if `key` is outside the ACL
    pub async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.check(key)?;
        Ok(self
            .inner
            .store
            .get(key)
            .await
            .map(|entry| entry.value.as_ref().clone()))
    }

    /// `SET key value [PX ttl]`
    ///
    /// # Errors
    /// - `CacheError::NoPermission` if `key` is outside the ACL
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.check(key)?;
        self.inner
            .store
            .insert(
                key.to_string(),
                Entry {
                    value: Arc::new(value),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    /// `DEL key`, returning whether a live entry was removed
    ///
    /// # Errors
    /// - `CacheError::NoPermission` if `key` is outside the ACL
    pub async fn del(&self, key: &str) -> Result<bool, CacheError> {
        self.check(key)?;
        Ok(self.inner.store.remove(key).await.is_some())
    }

    /// TTL the entry under `key` was written with
    ///
    /// # Errors
    /// - `CacheError::NoPermission` if `key` is outside the ACL
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        self.check(key)?;
        Ok(self.inner.store.get(key).await.and_then(|entry| entry.ttl))
    }

    /// Live keys matching `pattern` (`prefix*` or exact)
    ///
    /// The pattern itself must be inside the ACL, so a scan never lists keys the
    /// user could not read.
    ///
    /// # Errors
    /// - `CacheError::NoPermission` if `pattern` reaches outside the ACL
    pub fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.check(pattern)?;
        let matcher = AclUser::new("", [pattern]);
        let mut keys: Vec<String> = self
            .inner
            .store
            .iter()
            .filter(|(key, _)| matcher.permits(key))
            .map(|(key, _)| key.as_ref().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
