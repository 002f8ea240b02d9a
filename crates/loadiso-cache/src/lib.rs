//! Loadiso Cache - isolated cache backends
//!
//! - [`Keyspace`]: shared keyspace with per-entry TTL and per-user key ACLs
//! - [`PrefixedCacheManager`]: named caches writing `<prefix><cache>::<key>`
//! - [`RoutingCacheManager`]: picks the real or test manager per call

#![warn(unreachable_pub)]

pub mod error;
pub mod keyspace;
pub mod manager;
pub mod routing;

pub use error::CacheError;
pub use keyspace::{
    AclUser, Keyspace, KeyspaceClient, ADMIN_CACHE_USER, DEFAULT_CAPACITY, REAL_CACHE_USER,
    TEST_CACHE_USER,
};
pub use manager::{
    CacheManager, CacheSettings, NamedCache, PrefixedCache, PrefixedCacheManager, REAL_PREFIX,
    REAL_TTL, TEST_PREFIX, TEST_TTL,
};
pub use routing::RoutingCacheManager;
