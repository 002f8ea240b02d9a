//! Mixed-traffic isolation simulator
//!
//! Drives seeded, concurrent production and load-test requests through a fully
//! wired [`Application`] and checks afterwards that no request touched the
//! other partition of the datasource, cache or stream.
//!
//! Each worker reuses one [`ClassificationContext`] for all of its requests,
//! the way a pooled request thread would, so leaked classification state shows
//! up as a partition violation on the next request.

use crate::application::{Application, Backends, EventConsumers};
use crate::config::IsolationConfig;
use crate::error::AppError;
use crate::service::{UserRequest, UserService, USERS_CACHE};
use loadiso_cache::ADMIN_CACHE_USER;
use loadiso_core::{
    ClassificationContext, RequestHeaders, LOAD_TEST_VALUE, TEST_RUN_ID_HEADER,
    TRAFFIC_TYPE_HEADER,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// How long to wait for consumers to drain the streams
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Total requests across all workers
    pub requests: u64,
    /// Concurrent workers
    pub concurrency: usize,
    /// Share of requests classified as load test, `0.0..=1.0`
    pub test_ratio: f64,
    /// Application configuration under test
    pub isolation: IsolationConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            requests: 200,
            concurrency: 8,
            test_ratio: 0.5,
            isolation: IsolationConfig::default(),
        }
    }
}

/// An isolation violation detected during simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// A request saw or wrote a row of the other partition
    WrongPartition {
        /// Request number
        request: u64,
        /// Operation that observed the row
        operation: &'static str,
        /// Whether the request was load test
        expected_test: bool,
        /// Id of the offending row
        user_id: i64,
    },
    /// A cache key lies under the other classification's prefix
    CacheKeyOutsidePrefix {
        /// Full key
        key: String,
    },
    /// An event reached the consumer of the other classification
    EventOnWrongStream {
        /// User id of the event
        user_id: i64,
        /// Consumer that received it
        consumer: &'static str,
    },
    /// A created user's event never arrived
    MissingEvent {
        /// User id of the event
        user_id: i64,
    },
    /// A request failed outright
    RequestFailed {
        /// Request number
        request: u64,
        /// Error text
        error: String,
    },
    /// A worker's context was still established after its last request
    ContextLeaked {
        /// Worker index
        worker: usize,
    },
}

/// Statistics for simulation
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    /// Requests issued
    pub requests: u64,
    /// Of which load test
    pub test_requests: u64,
    /// Of which production
    pub production_requests: u64,
    /// Users persisted
    pub users_created: u64,
    /// Cache keys inspected
    pub cache_keys: u64,
    /// Events seen by any consumer
    pub events_observed: u64,
}

/// Final report from simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    /// Configuration the run used
    pub config: SimulatorConfig,
    /// Counters
    pub stats: SimulatorStats,
    /// Everything that broke isolation
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Whether no violation was found
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        use std::fmt::Write;

        let strategy = &self.config.isolation.strategy;
        let mut report = String::new();
        let _ = writeln!(report, "=== Load-Test Isolation Simulator Report ===\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Datasource Strategy: {:?}", strategy.datasource);
        let _ = writeln!(report, "Stream Strategy: {:?}", strategy.stream);
        let _ = writeln!(report, "Workers: {}", self.config.concurrency);
        let _ = writeln!(report, "Requests: {}", self.stats.requests);
        let _ = writeln!(report, "  Load Test: {}", self.stats.test_requests);
        let _ = writeln!(report, "  Production: {}", self.stats.production_requests);
        let _ = writeln!(report, "Users Created: {}", self.stats.users_created);
        let _ = writeln!(report, "Cache Keys Inspected: {}", self.stats.cache_keys);
        let _ = writeln!(report, "Events Observed: {}", self.stats.events_observed);
        let _ = writeln!(report, "Violations: {}", self.violations.len());

        if !self.violations.is_empty() {
            let _ = writeln!(report, "\n=== Violations ===");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {v:?}", i + 1);
            }
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }
}

/// Outcome of one simulated request
#[derive(Debug, Default)]
struct RequestOutcome {
    created: Option<(i64, bool)>,
    violations: Vec<Violation>,
}

/// Run the isolation simulator against freshly provisioned backends
///
/// # Errors
/// - `AppError` if the application cannot be provisioned or wired
pub async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, AppError> {
    let backends = Backends::provision(&config.isolation)?;
    let app = Arc::new(Application::build(config.isolation.clone(), backends)?);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let ratio = config.test_ratio.clamp(0.0, 1.0);
    let plan: Vec<bool> = (0..config.requests).map(|_| rng.gen_bool(ratio)).collect();

    let mut stats = SimulatorStats {
        requests: config.requests,
        test_requests: plan.iter().filter(|t| **t).count() as u64,
        ..SimulatorStats::default()
    };
    stats.production_requests = stats.requests - stats.test_requests;

    let workers = config.concurrency.max(1);
    let mut tasks = JoinSet::new();
    for worker in 0..workers {
        let app = Arc::clone(&app);
        let slice: Vec<(u64, bool)> = plan
            .iter()
            .enumerate()
            .filter(|(i, _)| i % workers == worker)
            .map(|(i, is_test)| (i as u64, *is_test))
            .collect();
        let seed = config.seed;
        tasks.spawn(async move { run_worker(&app, worker, seed, slice).await });
    }

    let mut violations = Vec::new();
    let mut created = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((outcomes, leaked)) => {
                for outcome in outcomes {
                    created.extend(outcome.created);
                    violations.extend(outcome.violations);
                }
                violations.extend(leaked);
            }
            Err(e) => violations.push(Violation::RequestFailed {
                request: u64::MAX,
                error: format!("worker aborted: {e}"),
            }),
        }
    }
    stats.users_created = created.len() as u64;

    violations.extend(check_cache(&app, &created, &mut stats)?);
    violations.extend(check_streams(&app, &created, &mut stats).await);

    let report = SimulatorReport {
        config,
        stats,
        violations,
    };
    match Arc::try_unwrap(app) {
        Ok(app) => app.shutdown().await,
        Err(_) => tracing::warn!("application still shared, listeners left running"),
    }
    tracing::info!(
        passed = report.passed(),
        violations = report.violations.len(),
        "simulation finished"
    );
    Ok(report)
}

async fn run_worker(
    app: &Application,
    worker: usize,
    seed: u64,
    requests: Vec<(u64, bool)>,
) -> (Vec<RequestOutcome>, Option<Violation>) {
    let ctx = ClassificationContext::new();
    let mut outcomes = Vec::with_capacity(requests.len());
    for (request, is_test) in requests {
        let headers = if is_test {
            RequestHeaders::new()
                .with(TRAFFIC_TYPE_HEADER, LOAD_TEST_VALUE)
                .with(TEST_RUN_ID_HEADER, format!("sim-{seed}"))
        } else {
            RequestHeaders::new()
        };
        let service = app.service().clone();
        let outcome = app
            .handle(&ctx, &headers, |scope| async move {
                simulate_request(&service, scope.context(), request, is_test).await
            })
            .await
            .unwrap_or_else(|e| RequestOutcome {
                created: None,
                violations: vec![Violation::RequestFailed {
                    request,
                    error: e.to_string(),
                }],
            });
        outcomes.push(outcome);
    }
    let leaked = ctx.is_established().then_some(Violation::ContextLeaked { worker });
    (outcomes, leaked)
}

/// Create, read back and list users, checking every row's partition
async fn simulate_request(
    service: &UserService,
    ctx: &ClassificationContext,
    request: u64,
    is_test: bool,
) -> RequestOutcome {
    let mut outcome = RequestOutcome::default();
    let failed = |error: String| Violation::RequestFailed { request, error };
    let check = |operation: &'static str, user_id: i64, saw_test: bool| {
        if saw_test != is_test {
            Some(Violation::WrongPartition {
                request,
                operation,
                expected_test: is_test,
                user_id,
            })
        } else {
            None
        }
    };

    let created = match service.create_user(
        ctx,
        UserRequest::new(
            format!("sim{request}"),
            "password",
            format!("sim{request}@example.com"),
        ),
    ) {
        Ok(created) => created,
        Err(e) => {
            outcome.violations.push(failed(e.to_string()));
            return outcome;
        }
    };
    let id = created.user.id;
    outcome.violations.extend(check("create", id, created.user.is_test));
    outcome.created = Some((id, created.user.is_test));
    if let Err(e) = created.publish.wait().await {
        outcome.violations.push(failed(e.to_string()));
    }

    match service.get_user_by_id(ctx, id).await {
        Ok(Some(user)) => outcome.violations.extend(check("get", user.id, user.is_test)),
        Ok(None) => outcome
            .violations
            .push(failed(format!("user {id} not visible to its creator"))),
        Err(e) => outcome.violations.push(failed(e.to_string())),
    }

    match service.list_users(ctx) {
        Ok(users) => {
            for user in users {
                outcome.violations.extend(check("list", user.id, user.is_test));
            }
        }
        Err(e) => outcome.violations.push(failed(e.to_string())),
    }
    outcome
}

/// Every cached user must sit under the prefix of its own partition
fn check_cache(
    app: &Application,
    created: &[(i64, bool)],
    stats: &mut SimulatorStats,
) -> Result<Vec<Violation>, AppError> {
    let cache = &app.config().cache;
    let admin = app.backends().keyspace.connect(ADMIN_CACHE_USER, &cache.password)?;
    let keys = admin.scan("*")?;
    stats.cache_keys = keys.len() as u64;

    let test_ids: BTreeSet<i64> = created.iter().filter(|(_, t)| *t).map(|(id, _)| *id).collect();
    let real_ids: BTreeSet<i64> = created.iter().filter(|(_, t)| !*t).map(|(id, _)| *id).collect();
    let real_users = format!("{}{USERS_CACHE}::", cache.real_prefix);
    let test_users = format!("{}{USERS_CACHE}::", cache.test_prefix);

    let mut violations = Vec::new();
    for key in keys {
        let misplaced = if let Some(id) = key.strip_prefix(&real_users) {
            id.parse::<i64>().is_ok_and(|id| test_ids.contains(&id))
        } else if let Some(id) = key.strip_prefix(&test_users) {
            id.parse::<i64>().is_ok_and(|id| real_ids.contains(&id))
        } else {
            false
        };
        if misplaced {
            violations.push(Violation::CacheKeyOutsidePrefix { key });
        }
    }
    Ok(violations)
}

/// Wait until every event was consumed, then check where each one landed
async fn check_streams(
    app: &Application,
    created: &[(i64, bool)],
    stats: &mut SimulatorStats,
) -> Vec<Violation> {
    let expected = created.len();
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    loop {
        if observed_events(app.consumers()).len() >= expected
            || tokio::time::Instant::now() >= deadline
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let observed = observed_events(app.consumers());
    stats.events_observed = observed.len() as u64;

    let mut violations = Vec::new();
    for (user_id, is_test, consumer) in &observed {
        let wrong = match *consumer {
            "real" | "shared-processed" => *is_test,
            "test" | "shared-ignored" => !*is_test,
            _ => false,
        };
        if wrong {
            violations.push(Violation::EventOnWrongStream {
                user_id: *user_id,
                consumer,
            });
        }
    }
    let seen: BTreeSet<i64> = observed.iter().map(|(id, _, _)| *id).collect();
    for (user_id, _) in created {
        if !seen.contains(user_id) {
            violations.push(Violation::MissingEvent { user_id: *user_id });
        }
    }
    violations
}

fn observed_events(consumers: &EventConsumers) -> Vec<(i64, bool, &'static str)> {
    match consumers {
        EventConsumers::Shared(shared) => shared
            .processed_events()
            .into_iter()
            .map(|e| (e.id, e.is_test, "shared-processed"))
            .chain(
                shared
                    .ignored_events()
                    .into_iter()
                    .map(|t| (t.event.id, t.event.is_test, "shared-ignored")),
            )
            .collect(),
        EventConsumers::Routed { real, test } => real
            .processed_events()
            .into_iter()
            .map(|e| (e.id, e.is_test, "real"))
            .chain(
                test.tracked_events()
                    .into_iter()
                    .map(|t| (t.event.id, t.event.is_test, "test")),
            )
            .collect(),
    }
}
