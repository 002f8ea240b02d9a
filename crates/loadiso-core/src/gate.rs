//! Ingress gate
//!
//! The one place where an inbound request is classified. The gate establishes
//! the unit's [`ClassificationContext`], optionally stamps the session marker,
//! runs the downstream handler inside a `traffic` span, and tears everything
//! down through a drop guard. The guard runs on normal return, handler error,
//! panic unwinding, timeout and cancellation of the request future alike.

use crate::classification::TrafficClassification;
use crate::context::ClassificationContext;
use crate::error::GateError;
use crate::headers::RequestHeaders;
use crate::session::SessionMarker;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// What the downstream handler receives for one request
#[derive(Debug, Clone)]
pub struct RequestScope {
    ctx: ClassificationContext,
    classification: TrafficClassification,
}

impl RequestScope {
    /// Context to pass to every resource-acquiring call
    #[inline]
    #[must_use]
    pub fn context(&self) -> &ClassificationContext {
        &self.ctx
    }

    /// Classification decided at ingress
    #[inline]
    #[must_use]
    pub fn classification(&self) -> &TrafficClassification {
        &self.classification
    }

    /// Whether the request is test traffic
    #[inline]
    #[must_use]
    pub fn is_test(&self) -> bool {
        self.classification.is_test()
    }
}

/// Scoped ownership of an established classification
///
/// Dropping the guard clears the context first and then the session marker, so
/// a failing marker can never leave the context populated.
#[must_use = "dropping the guard clears the classification immediately"]
#[derive(Debug)]
pub struct ClassificationGuard {
    ctx: ClassificationContext,
    marker: Option<Arc<dyn SessionMarker>>,
}

impl Drop for ClassificationGuard {
    fn drop(&mut self) {
        self.ctx.clear();
        if let Some(marker) = self.marker.take() {
            if let Err(e) = marker.clear(&self.ctx) {
                tracing::warn!(unit = %self.ctx.unit(), error = %e, "failed to clear session marker");
            }
        }
        tracing::trace!(unit = %self.ctx.unit(), "classification cleared");
    }
}

/// Classifies requests and owns the context lifecycle
#[derive(Debug, Clone, Default)]
pub struct IngressGate {
    marker: Option<Arc<dyn SessionMarker>>,
}

impl IngressGate {
    /// Gate for routing-based isolation (no session marking)
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate for session-based isolation
    #[inline]
    #[must_use]
    pub fn with_session_marker(marker: Arc<dyn SessionMarker>) -> Self {
        Self {
            marker: Some(marker),
        }
    }

    /// Whether this gate stamps a session marker
    #[inline]
    #[must_use]
    pub fn marks_sessions(&self) -> bool {
        self.marker.is_some()
    }

    /// Classify request metadata; never fails
    #[inline]
    #[must_use]
    pub fn classify(headers: &RequestHeaders) -> TrafficClassification {
        TrafficClassification::from_headers(headers)
    }

    /// Establish `classification` on `ctx` and return the guard that undoes it
    ///
    /// Context first, then session marker: any session the marker binds is
    /// acquired after the classification is visible.
    ///
    /// # Errors
    /// - `GateError::SessionMarking` if the marker cannot be stamped; the
    ///   context is already cleared again when this returns
    pub fn enter(
        &self,
        ctx: &ClassificationContext,
        classification: TrafficClassification,
    ) -> Result<ClassificationGuard, GateError> {
        let is_test = classification.is_test();
        if let Some(stale) = ctx.establish(classification) {
            tracing::warn!(
                unit = %ctx.unit(),
                stale = %stale,
                "replacing classification left over from a previous request"
            );
        }

        let mut guard = ClassificationGuard {
            ctx: ctx.clone(),
            marker: None,
        };

        if let Some(marker) = &self.marker {
            guard.marker = Some(Arc::clone(marker));
            if is_test {
                marker.mark_test(ctx)?;
            } else {
                marker.mark_production(ctx)?;
            }
        }

        Ok(guard)
    }

    /// Run `handler` for one request
    ///
    /// The handler's own output, success or failure, comes back inside `Ok`.
    ///
    /// # Errors
    /// - `GateError::SessionMarking` if test traffic could not be marked
    pub async fn handle<F, Fut, T>(
        &self,
        ctx: &ClassificationContext,
        headers: &RequestHeaders,
        handler: F,
    ) -> Result<T, GateError>
    where
        F: FnOnce(RequestScope) -> Fut,
        Fut: Future<Output = T>,
    {
        self.run(ctx, headers, None, handler).await
    }

    /// Run `handler` with an upper bound on its duration
    ///
    /// # Errors
    /// - `GateError::SessionMarking` if test traffic could not be marked
    /// - `GateError::Timeout` if the handler exceeded `limit`
    pub async fn handle_with_timeout<F, Fut, T>(
        &self,
        ctx: &ClassificationContext,
        headers: &RequestHeaders,
        limit: Duration,
        handler: F,
    ) -> Result<T, GateError>
    where
        F: FnOnce(RequestScope) -> Fut,
        Fut: Future<Output = T>,
    {
        self.run(ctx, headers, Some(limit), handler).await
    }

    async fn run<F, Fut, T>(
        &self,
        ctx: &ClassificationContext,
        headers: &RequestHeaders,
        limit: Option<Duration>,
        handler: F,
    ) -> Result<T, GateError>
    where
        F: FnOnce(RequestScope) -> Fut,
        Fut: Future<Output = T>,
    {
        let classification = Self::classify(headers);
        let span = tracing::info_span!(
            "traffic",
            traffic_type = %classification.kind(),
            test_run_id = %classification.run_id_or_placeholder(),
            unit = %ctx.unit(),
        );

        let guard = span.in_scope(|| self.enter(ctx, classification.clone()))?;
        let scope = RequestScope {
            ctx: ctx.clone(),
            classification,
        };

        let work = handler(scope).instrument(span.clone());
        let outcome = match limit {
            None => Ok(work.await),
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                let duration_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                span.in_scope(|| tracing::warn!(duration_ms, "request handler timed out"));
                GateError::Timeout { duration_ms }
            }),
        };

        drop(guard);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::LOAD_TEST_VALUE;
    use crate::error::SessionError;
    use crate::headers::{TEST_RUN_ID_HEADER, TRAFFIC_TYPE_HEADER};
    use crate::session::MarkerState;
    use parking_lot::Mutex;

    fn test_headers(run_id: &str) -> RequestHeaders {
        RequestHeaders::new()
            .with(TRAFFIC_TYPE_HEADER, LOAD_TEST_VALUE)
            .with(TEST_RUN_ID_HEADER, run_id)
    }

    /// Marker double that records every command
    #[derive(Debug, Default)]
    struct RecordingMarker {
        calls: Mutex<Vec<&'static str>>,
        fail_mark: bool,
        fail_clear: bool,
    }

    impl RecordingMarker {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }
    }

    impl SessionMarker for RecordingMarker {
        fn mark_test(&self, ctx: &ClassificationContext) -> Result<(), SessionError> {
            assert!(ctx.is_test(), "marker must see the classification first");
            self.calls.lock().push("mark_test");
            if self.fail_mark {
                return Err(SessionError::AcquisitionFailed("pool exhausted".into()));
            }
            Ok(())
        }

        fn mark_production(&self, _ctx: &ClassificationContext) -> Result<(), SessionError> {
            self.calls.lock().push("mark_production");
            Ok(())
        }

        fn clear(&self, _ctx: &ClassificationContext) -> Result<(), SessionError> {
            self.calls.lock().push("clear");
            if self.fail_clear {
                return Err(SessionError::SessionClosed("s-1".into()));
            }
            Ok(())
        }

        fn state(&self, _ctx: &ClassificationContext) -> MarkerState {
            MarkerState::Unmarked
        }

        fn current_effective_identity(
            &self,
            _ctx: &ClassificationContext,
        ) -> Result<String, SessionError> {
            Ok("app_user".into())
        }
    }

    #[tokio::test]
    async fn production_request_reads_production_throughout() {
        let gate = IngressGate::new();
        let ctx = ClassificationContext::new();

        let seen = gate
            .handle(&ctx, &RequestHeaders::new(), |scope| async move {
                scope.context().is_test()
            })
            .await
            .unwrap();

        assert!(!seen);
        assert!(!ctx.is_test());
        assert!(!ctx.is_established());
    }

    #[tokio::test]
    async fn test_request_is_visible_downstream_and_cleared_after() {
        let gate = IngressGate::new();
        let ctx = ClassificationContext::new();

        let run_id = gate
            .handle(&ctx, &test_headers("run-42"), |scope| async move {
                assert!(scope.is_test());
                assert!(scope.context().is_test());
                scope.classification().run_id().map(String::from)
            })
            .await
            .unwrap();

        assert_eq!(run_id.as_deref(), Some("run-42"));
        assert!(!ctx.is_established());
    }

    #[tokio::test]
    async fn handler_error_is_returned_unchanged_and_context_cleared() {
        let gate = IngressGate::new();
        let ctx = ClassificationContext::new();

        let outcome: Result<(), String> = gate
            .handle(&ctx, &test_headers("run-1"), |_| async {
                Err("downstream failed".to_string())
            })
            .await
            .unwrap();

        assert_eq!(outcome, Err("downstream failed".to_string()));
        assert!(!ctx.is_established());
    }

    #[tokio::test]
    async fn timeout_still_clears_context() {
        let gate = IngressGate::new();
        let ctx = ClassificationContext::new();

        let result = gate
            .handle_with_timeout(
                &ctx,
                &test_headers("slow"),
                Duration::from_millis(10),
                |_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                },
            )
            .await;

        assert!(matches!(result, Err(GateError::Timeout { duration_ms: 10 })));
        assert!(!ctx.is_established());
    }

    #[tokio::test]
    async fn cancelled_request_future_clears_context() {
        let gate = IngressGate::new();
        let ctx = ClassificationContext::new();
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();

        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                gate.handle(&ctx, &test_headers("cancel"), |_| async move {
                    let _ = entered_tx.send(());
                    std::future::pending::<()>().await;
                })
                .await
            })
        };

        entered_rx.await.unwrap();
        assert!(ctx.is_test());

        task.abort();
        let _ = task.await;
        assert!(!ctx.is_established());
    }

    #[tokio::test]
    async fn panicking_handler_still_clears_context() {
        let ctx = ClassificationContext::new();

        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                IngressGate::new()
                    .handle(&ctx, &test_headers("panic"), |_| async {
                        panic!("handler blew up");
                    })
                    .await
            })
        };

        assert!(task.await.unwrap_err().is_panic());
        assert!(!ctx.is_established());
    }

    #[tokio::test]
    async fn reused_unit_does_not_leak_between_requests() {
        let gate = IngressGate::new();
        let ctx = ClassificationContext::new();

        gate.handle(&ctx, &test_headers("first"), |_| async {})
            .await
            .unwrap();
        let second = gate
            .handle(&ctx, &RequestHeaders::new(), |scope| async move {
                scope.context().is_test()
            })
            .await
            .unwrap();

        assert!(!second);
    }

    #[tokio::test]
    async fn session_marker_is_symmetric_with_context() {
        let marker = Arc::new(RecordingMarker::default());
        let gate = IngressGate::with_session_marker(marker.clone());
        let ctx = ClassificationContext::new();

        gate.handle(&ctx, &test_headers("run-1"), |_| async {})
            .await
            .unwrap();
        gate.handle(&ctx, &RequestHeaders::new(), |_| async {})
            .await
            .unwrap();

        assert_eq!(
            marker.calls(),
            vec!["mark_test", "clear", "mark_production", "clear"]
        );
    }

    #[tokio::test]
    async fn marker_clear_failure_does_not_mask_outcome() {
        let marker = Arc::new(RecordingMarker {
            fail_clear: true,
            ..RecordingMarker::default()
        });
        let gate = IngressGate::with_session_marker(marker.clone());
        let ctx = ClassificationContext::new();

        let value = gate
            .handle(&ctx, &test_headers("run-1"), |_| async { 7 })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert!(!ctx.is_established());
        assert_eq!(marker.calls(), vec!["mark_test", "clear"]);
    }

    #[tokio::test]
    async fn marking_failure_rejects_request_and_cleans_up() {
        let marker = Arc::new(RecordingMarker {
            fail_mark: true,
            ..RecordingMarker::default()
        });
        let gate = IngressGate::with_session_marker(marker.clone());
        let ctx = ClassificationContext::new();

        let result = gate
            .handle(&ctx, &test_headers("run-1"), |_| async {
                unreachable!("handler must not run without a marked session")
            })
            .await;

        let err: GateError = result.unwrap_err();
        assert!(err.rejected_before_handler());
        assert!(!ctx.is_established());
        assert_eq!(marker.calls(), vec!["mark_test", "clear"]);
    }

    #[test]
    fn guard_clears_on_drop() {
        let gate = IngressGate::new();
        let ctx = ClassificationContext::new();

        let guard = gate
            .enter(&ctx, TrafficClassification::for_test("sync"))
            .unwrap();
        assert!(ctx.is_test());
        drop(guard);
        assert!(!ctx.is_test());
    }
}
