//! User operations
//!
//! Every operation takes the request's [`ClassificationContext`] and resolves
//! its datasource, cache and stream from it at the moment of use.

use crate::error::ServiceError;
use loadiso_cache::RoutingCacheManager;
use loadiso_core::ClassificationContext;
use loadiso_store::{DataSource, NewUser, UnitOfWork, User};
use loadiso_stream::{PublishHandle, UserCreatedEvent, UserEventPublisher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Cache holding users by id
pub const USERS_CACHE: &str = "users";

/// Fields a client supplies to create or update a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRequest {
    /// Login name
    pub username: String,
    /// Password
    pub password: String,
    /// Email address
    pub email: String,
}

impl UserRequest {
    /// Create request
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            email: email.into(),
        }
    }
}

/// User that was just created and the publish of its event
#[derive(Debug)]
pub struct CreatedUser {
    /// Persisted row
    pub user: User,
    /// Completion signal of the `UserCreatedEvent`
    pub publish: PublishHandle,
}

/// User service
#[derive(Debug, Clone)]
pub struct UserService {
    datasource: Arc<dyn DataSource>,
    caches: RoutingCacheManager,
    publisher: Arc<dyn UserEventPublisher>,
}

impl UserService {
    /// Create service over the routed resources
    #[must_use]
    pub fn new(
        datasource: Arc<dyn DataSource>,
        caches: RoutingCacheManager,
        publisher: Arc<dyn UserEventPublisher>,
    ) -> Self {
        Self {
            datasource,
            caches,
            publisher,
        }
    }

    /// Cache routing of this service
    #[inline]
    #[must_use]
    pub fn caches(&self) -> &RoutingCacheManager {
        &self.caches
    }

    fn begin(&self, ctx: &ClassificationContext) -> Result<UnitOfWork, ServiceError> {
        Ok(UnitOfWork::begin(self.datasource.as_ref(), ctx)?)
    }

    /// Every user visible to the current classification
    ///
    /// # Errors
    /// - `ServiceError::Store` if the datasource fails
    pub fn list_users(&self, ctx: &ClassificationContext) -> Result<Vec<User>, ServiceError> {
        Ok(self.begin(ctx)?.users().find_all()?)
    }

    /// User by email
    ///
    /// # Errors
    /// - `ServiceError::Store` if the datasource fails
    pub fn find_by_email(
        &self,
        ctx: &ClassificationContext,
        email: &str,
    ) -> Result<Option<User>, ServiceError> {
        Ok(self.begin(ctx)?.users().find_by_email(email)?)
    }

    /// User by id, read through the `users` cache
    ///
    /// Misses are not cached.
    ///
    /// # Errors
    /// - `ServiceError::Cache` if the cache refuses the command
    /// - `ServiceError::Store` if the datasource fails
    pub async fn get_user_by_id(
        &self,
        ctx: &ClassificationContext,
        id: i64,
    ) -> Result<Option<User>, ServiceError> {
        let cache = self.caches.get_named_cache(ctx, USERS_CACHE);
        let key = id.to_string();
        if let Some(user) = cache.get_as::<User>(&key).await? {
            tracing::debug!(id, "cache hit");
            return Ok(Some(user));
        }

        tracing::info!(id, "cache miss, fetching from database");
        let user = self.begin(ctx)?.users().find_by_id(id)?;
        if let Some(user) = &user {
            cache.put_as(&key, user).await?;
        }
        Ok(user)
    }

    /// Persist a user in the current classification's partition and publish
    /// its `UserCreatedEvent`
    ///
    /// The publish runs in the background; its failure does not undo the row.
    ///
    /// # Errors
    /// - `ServiceError::Store` if the insert is rejected
    pub fn create_user(
        &self,
        ctx: &ClassificationContext,
        request: UserRequest,
    ) -> Result<CreatedUser, ServiceError> {
        let new = NewUser::new(request.username, request.password, request.email)
            .with_test_flag(ctx.is_test());
        let user = self.begin(ctx)?.users().save(new)?;
        tracing::info!(id = user.id, is_test = user.is_test, "user created");

        let event = UserCreatedEvent {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            is_test: user.is_test,
        };
        let publish = self.publisher.publish_user_created(ctx, &event);
        Ok(CreatedUser { user, publish })
    }

    /// Overwrite username, password and email; `None` if the user is not visible
    ///
    /// # Errors
    /// - `ServiceError::Store` if the update is rejected
    /// - `ServiceError::Cache` if the stale entry cannot be evicted
    pub async fn update_user(
        &self,
        ctx: &ClassificationContext,
        id: i64,
        request: UserRequest,
    ) -> Result<Option<User>, ServiceError> {
        let updated = {
            let work = self.begin(ctx)?;
            let users = work.users();
            let Some(mut user) = users.find_by_id(id)? else {
                return Ok(None);
            };
            user.username = request.username;
            user.password = request.password;
            user.email = request.email;
            users.update(&user)?
        };
        self.caches
            .get_named_cache(ctx, USERS_CACHE)
            .evict(&id.to_string())
            .await?;
        Ok(Some(updated))
    }

    /// Delete a user; a user that is not visible is left alone
    ///
    /// Application roles have no delete policy, so for them the delete of a
    /// visible row surfaces as an unexpected row count.
    ///
    /// # Errors
    /// - `ServiceError::Store` if the delete affects no row
    /// - `ServiceError::Cache` if the cache entry cannot be evicted
    pub async fn delete_user(&self, ctx: &ClassificationContext, id: i64) -> Result<(), ServiceError> {
        {
            let work = self.begin(ctx)?;
            let users = work.users();
            if users.find_by_id(id)?.is_none() {
                return Ok(());
            }
            users.delete_by_id(id)?;
        }
        self.caches
            .get_named_cache(ctx, USERS_CACHE)
            .evict(&id.to_string())
            .await?;
        Ok(())
    }

    /// Clear the `users` cache of the current classification only
    ///
    /// # Errors
    /// - `ServiceError::Cache` if the cache refuses the command
    pub async fn evict_all_users_cache(&self, ctx: &ClassificationContext) -> Result<(), ServiceError> {
        tracing::info!(is_test = ctx.is_test(), "evicting all users from cache");
        self.caches.get_named_cache(ctx, USERS_CACHE).clear().await?;
        Ok(())
    }
}
