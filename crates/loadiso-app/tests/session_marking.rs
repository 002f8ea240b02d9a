//! One application role whose row visibility follows a session setting

use loadiso_app::{
    DatasourceStrategy, IsolationConfig, ServiceError, StreamStrategy, UserRequest,
};
use loadiso_core::{ClassificationContext, MarkerState, SessionMarker};
use loadiso_store::{NewUser, StoreError, UnitOfWork, APP_USER, TEST_MODE_SETTING};
use loadiso_test_utils::{
    config, fixture, production_headers, request, session_fixture, test_headers,
    SEEDED_PER_PARTITION,
};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn production_traffic_reads_real_users_without_binding() {
    let fx = session_fixture();
    let service = fx.app.service();
    let session = fx.app.session().unwrap();

    let (users, identity, state, bound) =
        request(&fx.app, &production_headers(), |ctx| async move {
            (
                service.list_users(&ctx).unwrap(),
                session.marker.current_effective_identity(&ctx).unwrap(),
                session.marker.state(&ctx),
                session.datasource.bound_count(),
            )
        })
        .await;

    assert_eq!(identity, APP_USER);
    assert_eq!(state, MarkerState::Unmarked);
    assert_eq!(bound, 0);
    assert_eq!(users.len(), SEEDED_PER_PARTITION);
    assert!(users.iter().all(|u| !u.is_test));
}

#[tokio::test]
async fn test_traffic_reads_test_users_through_marked_session() {
    let fx = session_fixture();
    let service = fx.app.service();
    let session = fx.app.session().unwrap();

    let (users, identity, state, setting) =
        request(&fx.app, &test_headers("session-it"), |ctx| async move {
            let setting = session
                .datasource
                .bound(&ctx)
                .and_then(|conn| conn.current_setting(TEST_MODE_SETTING).unwrap());
            (
                service.list_users(&ctx).unwrap(),
                session.marker.current_effective_identity(&ctx).unwrap(),
                session.marker.state(&ctx),
                setting,
            )
        })
        .await;

    assert_eq!(identity, APP_USER);
    assert_eq!(state, MarkerState::MarkedTest);
    assert_eq!(setting.as_deref(), Some("true"));
    assert_eq!(users.len(), SEEDED_PER_PARTITION);
    assert!(users.iter().all(|u| u.is_test));
    assert_eq!(session.datasource.bound_count(), 0);
}

#[tokio::test]
async fn marked_session_refuses_real_row() {
    let fx = session_fixture();
    let datasource = fx.app.datasource();

    let err = request(&fx.app, &test_headers("session-it"), |ctx| async move {
        UnitOfWork::begin(datasource.as_ref(), &ctx)
            .unwrap()
            .users()
            .save(NewUser::new("a", "b", "a@b.com"))
            .unwrap_err()
    })
    .await;

    assert!(err.is_policy_violation());
}

#[tokio::test]
async fn production_creates_updates_but_cannot_delete() {
    let fx = session_fixture();
    let service = fx.app.service();

    let (email, deleted) = request(&fx.app, &production_headers(), |ctx| async move {
        let created = service
            .create_user(&ctx, UserRequest::new("a", "b", "a@b.com"))
            .unwrap();
        assert!(!created.user.is_test);
        service
            .update_user(&ctx, created.user.id, UserRequest::new("a", "b", "b@b.com"))
            .await
            .unwrap();
        let email = service
            .get_user_by_id(&ctx, created.user.id)
            .await
            .unwrap()
            .map(|u| u.email);
        (email, service.delete_user(&ctx, created.user.id).await)
    })
    .await;

    assert_eq!(email.as_deref(), Some("b@b.com"));
    assert!(deleted.unwrap_err().is_unexpected_row_count());
}

#[tokio::test]
async fn released_session_carries_no_marker_into_next_request() {
    let fx = session_fixture();
    let service = fx.app.service();
    let gate_ctx = ClassificationContext::new();

    let test_users = fx
        .app
        .handle(&gate_ctx, &test_headers("first"), |scope| async move {
            service.list_users(scope.context()).unwrap()
        })
        .await
        .unwrap();
    let real_users = fx
        .app
        .handle(&gate_ctx, &production_headers(), |scope| async move {
            service.list_users(scope.context()).unwrap()
        })
        .await
        .unwrap();

    assert!(test_users.iter().all(|u| u.is_test));
    assert!(real_users.iter().all(|u| !u.is_test));
    assert_eq!(fx.app.session().unwrap().datasource.pool().active_count(), 0);
}

#[tokio::test]
async fn unmarkable_test_request_is_rejected_before_handler() {
    let fx = fixture(config(DatasourceStrategy::Session, StreamStrategy::Single).with_pool_size(1));
    let datasource = fx.app.datasource();
    let service = fx.app.service();

    let holder = UnitOfWork::begin(datasource.as_ref(), &ClassificationContext::new()).unwrap();
    let ctx = ClassificationContext::new();
    let err = fx
        .app
        .handle(&ctx, &test_headers("starved"), |_| async {
            unreachable!("test traffic must not run on an unmarked session")
        })
        .await
        .unwrap_err();
    assert!(err.rejected_before_handler());
    assert!(!ctx.is_established());

    drop(holder);
    let users = fx
        .app
        .handle(&ctx, &test_headers("starved"), |scope| async move {
            service.list_users(scope.context()).unwrap()
        })
        .await
        .unwrap();
    assert!(users.iter().all(|u| u.is_test));
}

#[tokio::test]
async fn killed_session_fails_the_request_and_recovers() {
    let fx = session_fixture();
    let service = fx.app.service();
    let session = fx.app.session().unwrap();
    let ctx = ClassificationContext::new();

    let result = fx
        .app
        .handle(&ctx, &test_headers("killed"), |scope| async move {
            let bound = session.datasource.bound(scope.context()).unwrap();
            assert!(session.datasource.pool().terminate(bound.session_id()));
            service.list_users(scope.context())
        })
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(ServiceError::Store(StoreError::ConnectionClosed(_)))
    ));
    assert!(!ctx.is_established());
    assert_eq!(session.datasource.bound_count(), 0);

    let users = fx
        .app
        .handle(&ctx, &test_headers("after-kill"), |scope| async move {
            service.list_users(scope.context()).unwrap()
        })
        .await
        .unwrap();
    assert_eq!(users.len(), SEEDED_PER_PARTITION);
    assert!(users.iter().all(|u| u.is_test));
    assert!(session.datasource.pool().stats().total_discarded >= 1);
}

#[tokio::test]
async fn routing_strategy_exposes_no_session_marker() {
    let fx = fixture(
        IsolationConfig::default().with_datasource_strategy(DatasourceStrategy::Routing),
    );
    assert!(fx.app.session().is_none());
    assert!(!fx.app.gate().marks_sessions());
}
