//! Two-backend resource routing
//!
//! A [`BackendRouter`] holds exactly two long-lived backends of the same
//! capability and picks one per acquisition from the caller's
//! [`ClassificationContext`]. The decision is never cached: a unit of execution
//! may span several classifications (background listeners, reused workers).

use crate::context::ClassificationContext;
use crate::error::RouterError;
use std::fmt;
use std::sync::Arc;

/// Symbolic backend selection key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKey {
    /// Production backend
    Real,
    /// Load-test backend
    Test,
}

impl BackendKey {
    /// Key selected by the current classification
    #[inline]
    #[must_use]
    pub fn for_context(ctx: &ClassificationContext) -> Self {
        if ctx.is_test() {
            Self::Test
        } else {
            Self::Real
        }
    }

    /// Symbolic name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Real => "REAL",
            Self::Test => "TEST",
        }
    }
}

impl fmt::Display for BackendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource kind served by a router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Relational connections
    Datasource,
    /// Named caches
    Cache,
    /// Message streams
    Stream,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Datasource => "datasource",
            Self::Cache => "cache",
            Self::Stream => "stream",
        })
    }
}

/// Selector between a real and a test backend
///
/// Backends are shared, never mutated by the router, and selecting needs no lock.
pub struct BackendRouter<B: ?Sized> {
    resource: ResourceKind,
    real: Arc<B>,
    test: Arc<B>,
}

impl<B: ?Sized> BackendRouter<B> {
    /// Start building a router for `resource`
    #[inline]
    #[must_use]
    pub fn builder(resource: ResourceKind) -> RouterBuilder<B> {
        RouterBuilder {
            resource,
            real: None,
            test: None,
        }
    }

    /// Build a router from both backends
    #[inline]
    #[must_use]
    pub fn new(resource: ResourceKind, real: Arc<B>, test: Arc<B>) -> Self {
        Self {
            resource,
            real,
            test,
        }
    }

    /// Resource served by this router
    #[inline]
    #[must_use]
    pub fn resource(&self) -> ResourceKind {
        self.resource
    }

    /// Backend for the classification in effect right now
    pub fn select(&self, ctx: &ClassificationContext) -> &Arc<B> {
        let key = BackendKey::for_context(ctx);
        tracing::debug!(
            resource = %self.resource,
            backend = %key,
            unit = %ctx.unit(),
            "routing resource acquisition"
        );
        self.backend(key)
    }

    /// Backend stored under `key`
    #[inline]
    #[must_use]
    pub fn backend(&self, key: BackendKey) -> &Arc<B> {
        match key {
            BackendKey::Real => &self.real,
            BackendKey::Test => &self.test,
        }
    }
}

impl<B: ?Sized> Clone for BackendRouter<B> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource,
            real: Arc::clone(&self.real),
            test: Arc::clone(&self.test),
        }
    }
}

impl<B: ?Sized> fmt::Debug for BackendRouter<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRouter")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

/// Builder that refuses to produce a half-bound router
pub struct RouterBuilder<B: ?Sized> {
    resource: ResourceKind,
    real: Option<Arc<B>>,
    test: Option<Arc<B>>,
}

impl<B: ?Sized> RouterBuilder<B> {
    /// Bind the production backend
    #[inline]
    #[must_use]
    pub fn real(mut self, backend: Arc<B>) -> Self {
        self.real = Some(backend);
        self
    }

    /// Bind the load-test backend
    #[inline]
    #[must_use]
    pub fn test(mut self, backend: Arc<B>) -> Self {
        self.test = Some(backend);
        self
    }

    /// Finish construction
    ///
    /// # Errors
    /// - `RouterError::MissingBackend` if either backend is unbound
    pub fn build(self) -> Result<BackendRouter<B>, RouterError> {
        let resource = self.resource;
        let real = self.real.ok_or(RouterError::MissingBackend {
            resource,
            key: BackendKey::Real,
        })?;
        let test = self.test.ok_or(RouterError::MissingBackend {
            resource,
            key: BackendKey::Test,
        })?;
        Ok(BackendRouter::new(resource, real, test))
    }
}
