//! Request-scoped classification state
//!
//! One [`ClassificationContext`] belongs to one unit of execution (a request
//! handling task). It is passed explicitly down the call chain, so every
//! function that acquires a resource states its dependency on classification.
//!
//! Only the ingress gate establishes and clears the context. Readers always get
//! production when nothing is established.

use crate::classification::{TrafficClassification, TrafficKind};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Identifier of a unit of execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub uuid::Uuid);

impl UnitId {
    /// Generate new unit id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct ContextInner {
    unit: UnitId,
    slot: RwLock<Option<TrafficClassification>>,
}

/// Classification holder for one unit of execution
///
/// Cloning yields another handle to the same unit; separate requests must use
/// separate contexts. A context may be reused for consecutive requests (pooled
/// workers), which is why clearing on every exit path matters.
#[derive(Debug, Clone)]
pub struct ClassificationContext {
    inner: Arc<ContextInner>,
}

impl ClassificationContext {
    /// Create a context for a new unit of execution
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                unit: UnitId::new(),
                slot: RwLock::new(None),
            }),
        }
    }

    /// Unit of execution this context belongs to
    #[inline]
    #[must_use]
    pub fn unit(&self) -> UnitId {
        self.inner.unit
    }

    /// Install a classification, returning the one it replaced
    ///
    /// A returned value means an earlier request leaked its state onto this unit.
    pub(crate) fn establish(
        &self,
        classification: TrafficClassification,
    ) -> Option<TrafficClassification> {
        self.inner.slot.write().replace(classification)
    }

    /// Remove any classification; idempotent
    pub(crate) fn clear(&self) {
        self.inner.slot.write().take();
    }

    /// Whether a classification is currently established
    #[inline]
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.inner.slot.read().is_some()
    }

    /// Whether the current request is test traffic
    #[inline]
    #[must_use]
    pub fn is_test(&self) -> bool {
        self.kind().is_test()
    }

    /// Current traffic kind, production by default
    #[must_use]
    pub fn kind(&self) -> TrafficKind {
        self.inner
            .slot
            .read()
            .as_ref()
            .map_or(TrafficKind::Production, TrafficClassification::kind)
    }

    /// Snapshot of the current classification, production by default
    #[must_use]
    pub fn current(&self) -> TrafficClassification {
        self.inner.slot.read().clone().unwrap_or_default()
    }
}

impl Default for ClassificationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Test-only access to the gate-owned lifecycle
///
/// Compiled only for this crate's tests and under the `testing` feature, which
/// downstream crates enable from `[dev-dependencies]` alone. Library builds have
/// no way to write a classification except through the ingress gate.
#[cfg(any(test, feature = "testing"))]
#[doc(hidden)]
pub mod testing {
    use super::{ClassificationContext, TrafficClassification};

    /// Establish a classification without going through the gate
    pub fn establish(ctx: &ClassificationContext, classification: TrafficClassification) {
        ctx.establish(classification);
    }

    /// Clear a classification without going through the gate
    pub fn clear(ctx: &ClassificationContext) {
        ctx.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_read_is_production() {
        let ctx = ClassificationContext::new();
        assert!(!ctx.is_established());
        assert!(!ctx.is_test());
        assert_eq!(ctx.current(), TrafficClassification::for_production());
    }

    #[test]
    fn establish_and_clear() {
        let ctx = ClassificationContext::new();
        let previous = ctx.establish(TrafficClassification::for_test("run-1"));
        assert!(previous.is_none());
        assert!(ctx.is_test());
        assert_eq!(ctx.current().run_id(), Some("run-1"));

        ctx.clear();
        assert!(!ctx.is_test());
        assert!(!ctx.is_established());
    }

    #[test]
    fn clear_is_idempotent() {
        let ctx = ClassificationContext::new();
        ctx.clear();
        ctx.clear();
        assert!(!ctx.is_test());

        ctx.establish(TrafficClassification::for_test("run-2"));
        ctx.clear();
        ctx.clear();
        assert!(!ctx.is_test());
    }

    #[test]
    fn establish_reports_leaked_state() {
        let ctx = ClassificationContext::new();
        ctx.establish(TrafficClassification::for_test("stale"));
        let previous = ctx.establish(TrafficClassification::for_production());
        assert_eq!(previous.and_then(|c| c.run_id().map(String::from)), Some("stale".into()));
    }

    #[test]
    fn contexts_do_not_share_state() {
        let a = ClassificationContext::new();
        let b = ClassificationContext::new();
        a.establish(TrafficClassification::for_test("run-a"));

        assert!(a.is_test());
        assert!(!b.is_test());
        assert_ne!(a.unit(), b.unit());
    }

    #[test]
    fn clones_share_the_unit() {
        let ctx = ClassificationContext::new();
        let handle = ctx.clone();
        ctx.establish(TrafficClassification::for_test("run-3"));

        assert!(handle.is_test());
        assert_eq!(handle.unit(), ctx.unit());
    }
}
