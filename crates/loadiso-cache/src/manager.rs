//! Named caches over a keyspace client
//!
//! Keys are written as `<prefix><cache>::<key>`, so two managers with different
//! prefixes never share an entry even on one keyspace.

use crate::error::CacheError;
use crate::keyspace::KeyspaceClient;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Production key prefix
pub const REAL_PREFIX: &str = "real:";
/// Load-test key prefix
pub const TEST_PREFIX: &str = "test:";
/// Production entry lifetime
pub const REAL_TTL: Duration = Duration::from_secs(3600);
/// Load-test entry lifetime
pub const TEST_TTL: Duration = Duration::from_secs(600);

/// Logical cache addressed by name
#[async_trait]
pub trait NamedCache: Send + Sync + Debug {
    /// Logical name
    fn name(&self) -> &str;

    /// Cached value for `key`
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store `value` under `key`; `null` is not cached
    async fn put(&self, key: &str, value: Value) -> Result<(), CacheError>;

    /// Remove `key`
    async fn evict(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every entry of this cache
    async fn clear(&self) -> Result<(), CacheError>;
}

impl dyn NamedCache {
    /// Typed [`NamedCache::get`]
    ///
    /// # Errors
    /// - `CacheError::Serialization` if the stored value does not decode as `T`
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Typed [`NamedCache::put`]
    ///
    /// # Errors
    /// - `CacheError::Serialization` if `value` does not encode
    pub async fn put_as<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        self.put(key, serde_json::to_value(value)?).await
    }
}

/// Source of named caches
pub trait CacheManager: Send + Sync + Debug {
    /// Cache called `name`, created on first use
    fn get_cache(&self, name: &str) -> Arc<dyn NamedCache>;

    /// Caches created so far
    fn cache_names(&self) -> Vec<String>;

    /// Key prefix of this manager
    fn prefix(&self) -> &str;
}

/// Prefix and lifetime of one manager's entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Key prefix
    pub prefix: String,
    /// Entry lifetime
    pub ttl: Duration,
}

impl CacheSettings {
    /// Production settings
    #[must_use]
    pub fn real() -> Self {
        Self {
            prefix: REAL_PREFIX.to_string(),
            ttl: REAL_TTL,
        }
    }

    /// Load-test settings
    #[must_use]
    pub fn test() -> Self {
        Self {
            prefix: TEST_PREFIX.to_string(),
            ttl: TEST_TTL,
        }
    }
}

/// Cache manager writing prefixed keys with a fixed lifetime
#[derive(Debug)]
pub struct PrefixedCacheManager {
    client: KeyspaceClient,
    settings: CacheSettings,
    caches: DashMap<String, Arc<PrefixedCache>>,
}

impl PrefixedCacheManager {
    /// Create manager
    ///
    /// # Errors
    /// - `CacheError::InvalidConfig` if the prefix is empty
    pub fn new(client: KeyspaceClient, settings: CacheSettings) -> Result<Self, CacheError> {
        if settings.prefix.is_empty() {
            return Err(CacheError::InvalidConfig("cache key prefix must not be empty".into()));
        }
        tracing::info!(
            user = client.user(),
            prefix = %settings.prefix,
            ttl_secs = settings.ttl.as_secs(),
            "cache manager ready"
        );
        Ok(Self {
            client,
            settings,
            caches: DashMap::new(),
        })
    }

    /// Entry lifetime
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.settings.ttl
    }
}

impl CacheManager for PrefixedCacheManager {
    fn get_cache(&self, name: &str) -> Arc<dyn NamedCache> {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(PrefixedCache {
                    name: name.to_string(),
                    key_prefix: format!("{}{name}::", self.settings.prefix),
                    ttl: self.settings.ttl,
                    client: self.client.clone(),
                })
            })
            .clone()
    }

    fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn prefix(&self) -> &str {
        &self.settings.prefix
    }
}

/// Named cache of a [`PrefixedCacheManager`]
#[derive(Debug)]
pub struct PrefixedCache {
    name: String,
    key_prefix: String,
    ttl: Duration,
    client: KeyspaceClient,
}

impl PrefixedCache {
    /// Full keyspace key for `key`
    #[must_use]
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }
}

#[async_trait]
impl NamedCache for PrefixedCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.client.get(&self.full_key(key)).await
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), CacheError> {
        if value.is_null() {
            tracing::debug!(cache = %self.name, key, "not caching null value");
            return Ok(());
        }
        self.client
            .set(&self.full_key(key), value, Some(self.ttl))
            .await
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        self.client.del(&self.full_key(key)).await.map(|_| ())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let keys = self.client.scan(&format!("{}*", self.key_prefix))?;
        tracing::debug!(cache = %self.name, count = keys.len(), "clearing cache");
        for key in keys {
            self.client.del(&key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::{Keyspace, ADMIN_CACHE_USER, REAL_CACHE_USER, TEST_CACHE_USER};
    use serde_json::json;

    fn managers(keyspace: &Keyspace) -> (PrefixedCacheManager, PrefixedCacheManager) {
        let real = PrefixedCacheManager::new(
            keyspace.connect(REAL_CACHE_USER, "secret").unwrap(),
            CacheSettings::real(),
        )
        .unwrap();
        let test = PrefixedCacheManager::new(
            keyspace.connect(TEST_CACHE_USER, "secret").unwrap(),
            CacheSettings::test(),
        )
        .unwrap();
        (real, test)
    }

    #[tokio::test]
    async fn keys_use_prefix_and_cache_name() {
        let keyspace = Keyspace::with_isolation_acls("secret");
        let (real, _) = managers(&keyspace);

        real.get_cache("users").put("1", json!({"id": 1})).await.unwrap();

        let admin = keyspace.connect(ADMIN_CACHE_USER, "secret").unwrap();
        assert_eq!(admin.scan("*").unwrap(), vec!["real:users::1"]);
        assert_eq!(admin.ttl("real:users::1").await.unwrap(), Some(REAL_TTL));
    }

    #[tokio::test]
    async fn same_logical_key_is_disjoint_across_managers() {
        let keyspace = Keyspace::with_isolation_acls("secret");
        let (real, test) = managers(&keyspace);

        real.get_cache("users").put("1", json!("real")).await.unwrap();
        test.get_cache("users").put("1", json!("test")).await.unwrap();

        assert_eq!(real.get_cache("users").get("1").await.unwrap(), Some(json!("real")));
        assert_eq!(test.get_cache("users").get("1").await.unwrap(), Some(json!("test")));

        test.get_cache("users").clear().await.unwrap();
        assert_eq!(test.get_cache("users").get("1").await.unwrap(), None);
        assert_eq!(real.get_cache("users").get("1").await.unwrap(), Some(json!("real")));
    }

    #[tokio::test]
    async fn names_are_per_manager() {
        let keyspace = Keyspace::with_isolation_acls("secret");
        let (real, test) = managers(&keyspace);
        real.get_cache("users");
        real.get_cache("orders");
        test.get_cache("users");

        assert_eq!(real.cache_names(), vec!["orders", "users"]);
        assert_eq!(test.cache_names(), vec!["users"]);
    }

    #[tokio::test]
    async fn null_is_not_cached() {
        let keyspace = Keyspace::with_isolation_acls("secret");
        let (real, _) = managers(&keyspace);
        let cache = real.get_cache("users");
        cache.put("9", Value::Null).await.unwrap();
        assert_eq!(cache.get("9").await.unwrap(), None);
    }

    #[tokio::test]
    async fn typed_access() {
        let keyspace = Keyspace::with_isolation_acls("secret");
        let (real, _) = managers(&keyspace);
        let cache = real.get_cache("numbers");
        cache.put_as("a", &vec![1, 2, 3]).await.unwrap();
        assert_eq!(cache.get_as::<Vec<i32>>("a").await.unwrap(), Some(vec![1, 2, 3]));
        assert!(cache.get_as::<String>("a").await.is_err());
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let keyspace = Keyspace::with_isolation_acls("secret");
        let err = PrefixedCacheManager::new(
            keyspace.connect(ADMIN_CACHE_USER, "secret").unwrap(),
            CacheSettings {
                prefix: String::new(),
                ttl: REAL_TTL,
            },
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig(_)));
    }
}
