//! Loadiso Store - role-partitioned relational backend
//!
//! In-process stand-in for a shared database whose `t_users` table is split into
//! a production and a load-test partition by server-side row policy:
//! - Roles bound to one partition, or to the `app.test_mode` session setting
//! - Bounded connection pools per role, sessions reset on return
//! - [`RoutingDataSource`] and [`SessionBoundDataSource`] strategies
//! - [`PoolSessionMarker`], the session marker for the session strategy
//!
//! # Example
//!
//! ```rust,ignore
//! use loadiso_store::{ConnectionPool, InMemoryDatabase, RoutingDataSource, UnitOfWork};
//! use std::sync::Arc;
//!
//! let db = Arc::new(InMemoryDatabase::with_isolation_roles("secret"));
//! let ds = RoutingDataSource::from_pools(
//!     Some(ConnectionPool::connect(Arc::clone(&db), "app_real_user", "secret", 10)?),
//!     Some(ConnectionPool::connect(db, "app_test_user", "secret", 10)?),
//! )?;
//! let work = UnitOfWork::begin(&ds, &ctx)?;
//! let users = work.users().find_all()?;
//! ```

#![warn(unreachable_pub)]

pub mod database;
pub mod datasource;
pub mod error;
pub mod marker;
pub mod model;
pub mod pool;
pub mod repository;
pub mod session;

pub use database::{
    InMemoryDatabase, RoleDefinition, RowPolicy, APP_REAL_USER, APP_TEST_USER, APP_USER,
    DB_ADMIN_USER, TEST_MODE_SETTING, USERS_TABLE,
};
pub use datasource::{DataSource, RoutingDataSource, SessionBoundDataSource, UnitOfWork};
pub use error::StoreError;
pub use marker::PoolSessionMarker;
pub use model::{NewUser, User};
pub use pool::{Connection, ConnectionPool, ConnectionProvider, PoolStats, DEFAULT_POOL_SIZE};
pub use repository::UserRepository;
pub use session::Session;
