//! `t_users` repository

use crate::error::StoreError;
use crate::model::{NewUser, User};
use crate::pool::Connection;

const UPDATE_STATEMENT: &str =
    "update t_users set email=?, is_test=?, password=?, username=? where id=?";
const DELETE_STATEMENT: &str = "delete from t_users where id=?";

/// User queries over one connection
///
/// Policy errors are returned as they come from the server.
#[derive(Debug, Clone, Copy)]
pub struct UserRepository<'c> {
    conn: &'c Connection,
}

impl<'c> UserRepository<'c> {
    /// Create repository over `conn`
    #[inline]
    #[must_use]
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// All visible users
    ///
    /// # Errors
    /// - `StoreError::ConnectionClosed` if the session is gone
    pub fn find_all(&self) -> Result<Vec<User>, StoreError> {
        self.conn.select_users()
    }

    /// Visible user by id
    ///
    /// # Errors
    /// - `StoreError::ConnectionClosed` if the session is gone
    pub fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        self.conn.select_user(id)
    }

    /// Visible user by email
    ///
    /// # Errors
    /// - `StoreError::ConnectionClosed` if the session is gone
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.conn.select_user_by_email(email)
    }

    /// Insert a user
    ///
    /// # Errors
    /// - `StoreError::PolicyViolation` if the row is outside the session's partition
    /// - `StoreError::UniqueViolation` on duplicate email
    pub fn save(&self, user: NewUser) -> Result<User, StoreError> {
        let saved = self.conn.insert_user(user)?;
        tracing::debug!(id = saved.id, is_test = saved.is_test, "user inserted");
        Ok(saved)
    }

    /// Overwrite an existing user
    ///
    /// # Errors
    /// - `StoreError::UnexpectedRowCount` if the row is not visible
    /// - `StoreError::PolicyViolation` if the new row leaves the partition
    pub fn update(&self, user: &User) -> Result<User, StoreError> {
        let affected = self.conn.update_user(user)?;
        expect_one(affected, UPDATE_STATEMENT)?;
        Ok(user.clone())
    }

    /// Delete by id
    ///
    /// # Errors
    /// - `StoreError::UnexpectedRowCount` if no row was deleted
    pub fn delete_by_id(&self, id: i64) -> Result<(), StoreError> {
        let affected = self.conn.delete_user(id)?;
        expect_one(affected, DELETE_STATEMENT)
    }
}

fn expect_one(actual: u64, statement: &str) -> Result<(), StoreError> {
    if actual == 1 {
        Ok(())
    } else {
        Err(StoreError::UnexpectedRowCount {
            expected: 1,
            actual,
            statement: statement.to_string(),
        })
    }
}
