//! Cache manager router

use crate::manager::{CacheManager, NamedCache};
use loadiso_core::{BackendKey, BackendRouter, ClassificationContext, ResourceKind, RouterError};
use std::sync::Arc;

/// Routes named-cache lookups to the real or test cache manager
///
/// Each call resolves the manager first and then delegates, holding only the
/// selected manager. Prefixing stays with the managers.
#[derive(Debug, Clone)]
pub struct RoutingCacheManager {
    router: BackendRouter<dyn CacheManager>,
}

impl RoutingCacheManager {
    /// Wrap an existing router
    #[inline]
    #[must_use]
    pub fn new(router: BackendRouter<dyn CacheManager>) -> Self {
        Self { router }
    }

    /// Build from the two managers
    ///
    /// # Errors
    /// - `RouterError::MissingBackend` if a manager is missing
    pub fn from_managers(
        real: Option<Arc<dyn CacheManager>>,
        test: Option<Arc<dyn CacheManager>>,
    ) -> Result<Self, RouterError> {
        let mut builder = BackendRouter::<dyn CacheManager>::builder(ResourceKind::Cache);
        if let Some(real) = real {
            builder = builder.real(real);
        }
        if let Some(test) = test {
            builder = builder.test(test);
        }
        builder.build().map(Self::new)
    }

    /// Named cache of the manager selected for `ctx`
    #[must_use]
    pub fn get_named_cache(&self, ctx: &ClassificationContext, name: &str) -> Arc<dyn NamedCache> {
        self.router.select(ctx).get_cache(name)
    }

    /// Cache names of the manager selected for `ctx`
    #[must_use]
    pub fn list_cache_names(&self, ctx: &ClassificationContext) -> Vec<String> {
        self.router.select(ctx).cache_names()
    }

    /// Manager registered under `key`
    #[inline]
    #[must_use]
    pub fn manager(&self, key: BackendKey) -> &Arc<dyn CacheManager> {
        self.router.backend(key)
    }
}
