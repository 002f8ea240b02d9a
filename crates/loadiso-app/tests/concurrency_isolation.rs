//! Interleaved production and load-test requests never share classification

use loadiso_app::{
    run_simulator, DatasourceStrategy, IsolationConfig, SimulatorConfig, StreamStrategy,
    UserRequest,
};
use loadiso_core::{ClassificationContext, RequestHeaders};
use loadiso_test_utils::{
    config, fixture, production_headers, test_headers, Fixture, SEEDED_PER_PARTITION,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

async fn interleaved_requests(fx: Arc<Fixture>, requests: usize) {
    let mut tasks = JoinSet::new();
    for i in 0..requests {
        let fx = Arc::clone(&fx);
        let is_test = i % 2 == 0;
        tasks.spawn(async move {
            let headers: RequestHeaders = if is_test {
                test_headers(&format!("run-{i}"))
            } else {
                production_headers()
            };
            let ctx = ClassificationContext::new();
            let service = fx.app.service();
            fx.app
                .handle(&ctx, &headers, |scope| async move {
                    let ctx = scope.context();
                    let request = UserRequest::new(format!("u{i}"), "pw", format!("u{i}@x.io"));
                    let created = service.create_user(ctx, request).unwrap();
                    assert_eq!(created.user.is_test, is_test, "request {i} wrote wrong partition");
                    tokio::time::sleep(Duration::from_millis(1)).await;

                    let users = service.list_users(ctx).unwrap();
                    assert!(
                        users.iter().all(|u| u.is_test == is_test),
                        "request {i} saw other partition"
                    );
                    assert!(users.len() >= SEEDED_PER_PARTITION);

                    let fetched = service.get_user_by_id(ctx, created.user.id).await.unwrap();
                    assert_eq!(fetched.map(|u| u.is_test), Some(is_test));
                    assert_eq!(scope.is_test(), is_test);
                })
                .await
                .unwrap();
            assert!(!ctx.is_established());
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn session_strategy_under_concurrency() {
    // every in-flight test request holds a bound session
    let fx = Arc::new(fixture(
        config(DatasourceStrategy::Session, StreamStrategy::Single).with_pool_size(64),
    ));
    interleaved_requests(Arc::clone(&fx), 64).await;

    let all = fx.all_users();
    assert_eq!(all.iter().filter(|u| u.is_test).count(), SEEDED_PER_PARTITION + 32);
    assert_eq!(all.iter().filter(|u| !u.is_test).count(), SEEDED_PER_PARTITION + 32);
    assert_eq!(fx.app.session().unwrap().datasource.bound_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn routing_strategy_under_concurrency() {
    let fx = Arc::new(fixture(config(DatasourceStrategy::Routing, StreamStrategy::Topic)));
    interleaved_requests(Arc::clone(&fx), 64).await;

    let all = fx.all_users();
    assert_eq!(all.iter().filter(|u| u.is_test).count(), SEEDED_PER_PARTITION + 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pooled_workers_reusing_contexts_do_not_leak() {
    for (datasource, stream) in [
        (DatasourceStrategy::Session, StreamStrategy::Single),
        (DatasourceStrategy::Session, StreamStrategy::Topic),
        (DatasourceStrategy::Routing, StreamStrategy::Single),
        (DatasourceStrategy::Routing, StreamStrategy::Topic),
    ] {
        let report = run_simulator(SimulatorConfig {
            seed: 7,
            requests: 120,
            concurrency: 6,
            test_ratio: 0.3,
            isolation: IsolationConfig::default()
                .with_datasource_strategy(datasource)
                .with_stream_strategy(stream),
        })
        .await
        .unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.stats.users_created, 120);
    }
}
