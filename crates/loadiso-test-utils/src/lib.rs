//! Testing utilities for the loadiso workspace
//!
//! Shared fixtures: provisioned and seeded backends, applications per
//! strategy, request headers and a polling helper for asynchronous consumers.

#![allow(missing_docs)]

use loadiso_app::{
    init_tracing, Application, Backends, DatasourceStrategy, IsolationConfig, LogFormat,
    StreamStrategy,
};
use loadiso_core::{
    ClassificationContext, RequestHeaders, LOAD_TEST_VALUE, TEST_RUN_ID_HEADER, TRAFFIC_TYPE_HEADER,
};
use loadiso_store::{ConnectionPool, NewUser, SessionBoundDataSource, UnitOfWork, User};
use std::future::Future;
use std::time::Duration;

/// Users seeded into each partition
pub const SEEDED_PER_PARTITION: usize = 5;

/// Default wait for asynchronous consumers
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Rows inserted by [`seed_users`]
#[derive(Debug, Clone)]
pub struct SeededUsers {
    pub real: Vec<User>,
    pub test: Vec<User>,
}

/// Application plus the rows seeded before it started
#[derive(Debug)]
pub struct Fixture {
    pub app: Application,
    pub seeded: SeededUsers,
}

impl Fixture {
    pub fn config(&self) -> &IsolationConfig {
        self.app.config()
    }

    pub fn backends(&self) -> &Backends {
        self.app.backends()
    }

    /// Every row, read with the admin role
    pub fn all_users(&self) -> Vec<User> {
        all_users(self.backends(), self.config())
    }
}

/// Install a compact subscriber once per test binary
pub fn init_test_tracing() {
    init_tracing(LogFormat::Compact);
}

/// Default configuration with the given strategies
pub fn config(datasource: DatasourceStrategy, stream: StreamStrategy) -> IsolationConfig {
    IsolationConfig::default()
        .with_datasource_strategy(datasource)
        .with_stream_strategy(stream)
}

fn admin_unit(backends: &Backends, config: &IsolationConfig) -> UnitOfWork {
    let ds = &config.datasource;
    let pool = ConnectionPool::connect(
        backends.database.clone(),
        &ds.admin_user,
        &ds.password,
        1,
    )
    .unwrap();
    UnitOfWork::begin(&SessionBoundDataSource::new(pool), &ClassificationContext::new()).unwrap()
}

/// Insert [`SEEDED_PER_PARTITION`] real and test users with the admin role
pub fn seed_users(backends: &Backends, config: &IsolationConfig) -> SeededUsers {
    let work = admin_unit(backends, config);
    let users = work.users();
    let mut seeded = SeededUsers {
        real: Vec::new(),
        test: Vec::new(),
    };
    for i in 1..=SEEDED_PER_PARTITION {
        seeded.real.push(
            users
                .save(NewUser::new(
                    format!("real_user_{i}"),
                    "password",
                    format!("real{i}@example.com"),
                ))
                .unwrap(),
        );
        seeded.test.push(
            users
                .save(
                    NewUser::new(
                        format!("test_user_{i}"),
                        "password",
                        format!("loadtest{i}@example.com"),
                    )
                    .with_test_flag(true),
                )
                .unwrap(),
        );
    }
    seeded
}

/// Every row, read with the admin role
pub fn all_users(backends: &Backends, config: &IsolationConfig) -> Vec<User> {
    admin_unit(backends, config).users().find_all().unwrap()
}

/// Provision, seed and start an application; needs a tokio runtime
pub fn fixture(config: IsolationConfig) -> Fixture {
    init_test_tracing();
    let backends = Backends::provision(&config).unwrap();
    let seeded = seed_users(&backends, &config);
    let app = Application::build(config, backends).unwrap();
    Fixture { app, seeded }
}

pub fn session_fixture() -> Fixture {
    fixture(config(DatasourceStrategy::Session, StreamStrategy::Single))
}

pub fn routing_fixture() -> Fixture {
    fixture(config(DatasourceStrategy::Routing, StreamStrategy::Single))
}

pub fn topic_fixture() -> Fixture {
    fixture(config(DatasourceStrategy::Routing, StreamStrategy::Topic))
}

/// Headers of a load-test request
pub fn test_headers(run_id: &str) -> RequestHeaders {
    RequestHeaders::new()
        .with(TRAFFIC_TYPE_HEADER, LOAD_TEST_VALUE)
        .with(TEST_RUN_ID_HEADER, run_id)
}

/// Headers of a production request
pub fn production_headers() -> RequestHeaders {
    RequestHeaders::new()
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn await_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Hold the condition false for `window` to show nothing arrives
pub async fn stays_false(window: Duration, condition: impl FnMut() -> bool) -> bool {
    !await_until(window, condition).await
}

/// Run `f` through the gate as one request on a fresh unit of execution
pub async fn request<F, Fut, T>(app: &Application, headers: &RequestHeaders, f: F) -> T
where
    F: FnOnce(ClassificationContext) -> Fut,
    Fut: Future<Output = T>,
{
    let ctx = ClassificationContext::new();
    app.handle(&ctx, headers, |scope| f(scope.context().clone()))
        .await
        .unwrap()
}
