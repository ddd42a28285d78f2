//! Persistence seams for users and sessions
//!
//! The auth service only talks to the [`CredentialStore`] and
//! [`SessionStore`] traits. PostgreSQL implementations back production;
//! the in-process ones in [`memory`] back tests and local development.

pub mod memory;
pub mod session;
pub mod user;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewSession, NewUser, OneTimePurpose, Session, User, UserUpdate};

pub use memory::{MemoryCredentialStore, MemorySessionStore};
pub use session::SessionRepository;
pub use user::UserRepository;

/// Store failures, classified by whether a retry can help
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Timeout, closed pool or broken connection
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A unique constraint rejected the write
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Any other query failure
    #[error("store query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::UniqueViolation(db.constraint().unwrap_or("unique").to_string())
            }
            _ => StoreError::Query(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Run a database future under a deadline, surfacing a timeout as `Unavailable`
pub(crate) async fn bounded<T, F>(timeout: Duration, op: &'static str, fut: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Unavailable(format!(
            "{op} timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Persistence of user records
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// Find the user holding an outstanding one-time token digest
    async fn get_by_token(
        &self,
        purpose: OneTimePurpose,
        token_hash: &str,
    ) -> StoreResult<Option<User>>;

    /// Insert a new, inactive user; a taken email yields `UniqueViolation`
    async fn insert(&self, user: NewUser) -> StoreResult<User>;

    /// Apply a targeted update and return the row as written. Returns `None`,
    /// writing nothing, when the user is unknown or a guard no longer holds.
    async fn update(&self, id: Uuid, update: &UserUpdate) -> StoreResult<Option<User>>;

    /// One page of users, oldest first
    async fn list(&self, offset: i64, limit: i64) -> StoreResult<Vec<User>>;
}

/// Persistence of refresh-token sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: NewSession) -> StoreResult<Session>;

    /// The session for `jti` if it exists, is not revoked and has not expired
    async fn find_active(&self, jti: Uuid) -> StoreResult<Option<Session>>;

    /// The session for `jti` in any state
    async fn find(&self, jti: Uuid) -> StoreResult<Option<Session>>;

    /// Revoke one session. Returns false if it was unknown or already revoked.
    async fn revoke(&self, jti: Uuid) -> StoreResult<bool>;

    /// Revoke every active session of a user, returning how many were revoked
    async fn revoke_all(&self, user_id: Uuid) -> StoreResult<u64>;

    /// Atomically revoke the active session `old_jti` owned by `user_id` and
    /// insert `next` in its place. Returns `None`, writing nothing, if the old
    /// session was not active.
    async fn rotate(
        &self,
        old_jti: Uuid,
        user_id: Uuid,
        next: NewSession,
    ) -> StoreResult<Option<Session>>;

    /// Delete sessions that expired before `before`
    async fn purge_expired(&self, before: DateTime<Utc>) -> StoreResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out_as_unavailable() {
        let result: StoreResult<()> = bounded(Duration::from_millis(10), "slow query", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_transient());
    }
}
