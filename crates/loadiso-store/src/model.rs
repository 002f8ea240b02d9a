//! Persisted entities

use serde::{Deserialize, Serialize};

/// Row of `t_users`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// Sequence-assigned id
    pub id: i64,
    /// Login name
    pub username: String,
    /// Password (stored as given)
    pub password: String,
    /// Email address, unique per partition
    pub email: String,
    /// Whether the row belongs to load-test traffic
    pub is_test: bool,
}

/// User about to be inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Login name
    pub username: String,
    /// Password
    pub password: String,
    /// Email address
    pub email: String,
    /// Partition flag
    pub is_test: bool,
}

impl NewUser {
    /// Create a production user
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
            is_test: false,
        }
    }

    /// Set the partition flag
    #[inline]
    #[must_use]
    pub fn with_test_flag(mut self, is_test: bool) -> Self {
        self.is_test = is_test;
        self
    }
}
