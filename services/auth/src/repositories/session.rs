//! Session repository for refresh-token records

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{SessionStore, StoreError, StoreResult, bounded};
use crate::models::{NewSession, Session};

const SESSION_COLUMNS: &str =
    "id, user_id, jti, issued_at, expires_at, revoked, revoked_at, replaced_by";

/// Session repository
#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
    timeout: Duration,
}

impl SessionRepository {
    /// Create a new session repository
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn create(&self, new: NewSession) -> StoreResult<Session> {
        let sql = format!(
            r#"
            INSERT INTO sessions (id, user_id, jti, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {SESSION_COLUMNS}
            "#
        );
        bounded(
            self.timeout,
            "create session",
            sqlx::query_as::<_, Session>(&sql)
                .bind(Uuid::new_v4())
                .bind(new.user_id)
                .bind(new.jti)
                .bind(new.issued_at)
                .bind(new.expires_at)
                .fetch_one(&self.pool),
        )
        .await
    }

    async fn find_active(&self, jti: Uuid) -> StoreResult<Option<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE jti = $1 AND revoked = FALSE AND expires_at > NOW()"
        );
        bounded(
            self.timeout,
            "find active session",
            sqlx::query_as::<_, Session>(&sql)
                .bind(jti)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn find(&self, jti: Uuid) -> StoreResult<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE jti = $1");
        bounded(
            self.timeout,
            "find session",
            sqlx::query_as::<_, Session>(&sql)
                .bind(jti)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn revoke(&self, jti: Uuid) -> StoreResult<bool> {
        let result = bounded(
            self.timeout,
            "revoke session",
            sqlx::query(
                "UPDATE sessions SET revoked = TRUE, revoked_at = NOW() \
                 WHERE jti = $1 AND revoked = FALSE",
            )
            .bind(jti)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all(&self, user_id: Uuid) -> StoreResult<u64> {
        let result = bounded(
            self.timeout,
            "revoke user sessions",
            sqlx::query(
                "UPDATE sessions SET revoked = TRUE, revoked_at = NOW() \
                 WHERE user_id = $1 AND revoked = FALSE",
            )
            .bind(user_id)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }

    async fn rotate(
        &self,
        old_jti: Uuid,
        user_id: Uuid,
        next: NewSession,
    ) -> StoreResult<Option<Session>> {
        let insert_sql = format!(
            r#"
            INSERT INTO sessions (id, user_id, jti, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {SESSION_COLUMNS}
            "#
        );

        // The conditional UPDATE takes the row lock; a concurrent rotation of
        // the same jti re-checks `revoked = FALSE` after we commit and matches nothing.
        let rotation = async {
            let mut tx = self.pool.begin().await?;

            let revoked = sqlx::query(
                r#"
                UPDATE sessions
                SET revoked = TRUE, revoked_at = NOW(), replaced_by = $3
                WHERE jti = $1 AND user_id = $2 AND revoked = FALSE AND expires_at > NOW()
                "#,
            )
            .bind(old_jti)
            .bind(user_id)
            .bind(next.jti)
            .execute(&mut *tx)
            .await?;

            if revoked.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok::<_, sqlx::Error>(None);
            }

            let session = sqlx::query_as::<_, Session>(&insert_sql)
                .bind(Uuid::new_v4())
                .bind(user_id)
                .bind(next.jti)
                .bind(next.issued_at)
                .bind(next.expires_at)
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(Some(session))
        };

        let rotated = bounded(self.timeout, "rotate session", rotation).await;
        if let Err(StoreError::Unavailable(reason)) = &rotated {
            debug!("Session rotation aborted: {}", reason);
        }
        rotated
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = bounded(
            self.timeout,
            "purge expired sessions",
            sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
                .bind(before)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }
}
