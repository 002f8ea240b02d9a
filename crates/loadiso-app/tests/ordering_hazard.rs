//! Classification only affects connections acquired after it is established
//!
//! A unit of work pins its connection when it begins. If that happens before
//! the gate classifies the request, the whole unit keeps running against the
//! production partition. These tests pin that behavior down so a change to it
//! is noticed.

use loadiso_core::{ClassificationContext, TrafficClassification};
use loadiso_store::{UnitOfWork, APP_REAL_USER, APP_TEST_USER, APP_USER, TEST_MODE_SETTING};
use loadiso_test_utils::{routing_fixture, session_fixture};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn routing_unit_begun_early_stays_on_real_pool() {
    let fx = routing_fixture();
    let datasource = fx.app.datasource().as_ref();
    let ctx = ClassificationContext::new();

    let early = UnitOfWork::begin(datasource, &ctx).unwrap();
    let _guard = fx
        .app
        .gate()
        .enter(&ctx, TrafficClassification::for_test("late"))
        .unwrap();
    assert!(ctx.is_test());

    assert_eq!(early.current_user().unwrap(), APP_REAL_USER);
    assert!(early.users().find_all().unwrap().iter().all(|u| !u.is_test));

    let late = UnitOfWork::begin(datasource, &ctx).unwrap();
    assert_eq!(late.current_user().unwrap(), APP_TEST_USER);
    assert!(late.users().find_all().unwrap().iter().all(|u| u.is_test));
}

#[tokio::test]
async fn session_unit_begun_early_keeps_unmarked_connection() {
    let fx = session_fixture();
    let datasource = fx.app.datasource().as_ref();
    let ctx = ClassificationContext::new();

    let early = UnitOfWork::begin(datasource, &ctx).unwrap();
    let guard = fx
        .app
        .gate()
        .enter(&ctx, TrafficClassification::for_test("late"))
        .unwrap();

    assert_eq!(early.current_user().unwrap(), APP_USER);
    assert_eq!(early.connection().current_setting(TEST_MODE_SETTING).unwrap(), None);
    assert!(early.users().find_all().unwrap().iter().all(|u| !u.is_test));

    let late = UnitOfWork::begin(datasource, &ctx).unwrap();
    assert!(!late.connection().same_checkout(early.connection()));
    assert_eq!(
        late.connection()
            .current_setting(TEST_MODE_SETTING)
            .unwrap()
            .as_deref(),
        Some("true")
    );
    assert!(late.users().find_all().unwrap().iter().all(|u| u.is_test));

    drop(late);
    drop(guard);
    assert!(!ctx.is_established());
    assert_eq!(fx.app.session().unwrap().datasource.bound_count(), 0);
}

#[tokio::test]
async fn units_begun_inside_the_gate_follow_classification() {
    let fx = session_fixture();
    let datasource = fx.app.datasource().as_ref();
    let ctx = ClassificationContext::new();

    {
        let _guard = fx
            .app
            .gate()
            .enter(&ctx, TrafficClassification::for_test("inside"))
            .unwrap();
        let first = UnitOfWork::begin(datasource, &ctx).unwrap();
        let users = first.users().find_all().unwrap();
        assert!(users.iter().all(|u| u.is_test));
        drop(first);

        let second = UnitOfWork::begin(datasource, &ctx).unwrap();
        assert_eq!(second.unit(), ctx.unit());
        assert!(second.users().find_all().unwrap().iter().all(|u| u.is_test));
    }

    let after = UnitOfWork::begin(datasource, &ctx).unwrap();
    assert!(after.users().find_all().unwrap().iter().all(|u| !u.is_test));
}
