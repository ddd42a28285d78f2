//! User repository for database operations

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use super::{CredentialStore, StoreResult, bounded};
use crate::models::{NewUser, OneTimePurpose, User, UserUpdate};

const USER_COLUMNS: &str = "id, email, full_name, password_hash, is_active, is_email_verified, \
    is_superuser, verification_token_hash, verification_expires_at, reset_token_hash, reset_expires_at, \
    created_at, updated_at";

fn token_column(purpose: OneTimePurpose) -> &'static str {
    match purpose {
        OneTimePurpose::Verification => "verification_token_hash",
        OneTimePurpose::PasswordReset => "reset_token_hash",
    }
}

fn expiry_column(purpose: OneTimePurpose) -> &'static str {
    match purpose {
        OneTimePurpose::Verification => "verification_expires_at",
        OneTimePurpose::PasswordReset => "reset_expires_at",
    }
}

/// Build `UPDATE users SET ... WHERE ... RETURNING ...` for the set fields and guards
fn update_query(id: Uuid, update: &UserUpdate) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new("UPDATE users SET updated_at = NOW()");

    if let Some(hash) = &update.password_hash {
        builder.push(", password_hash = ");
        builder.push_bind(hash.clone());
    }
    if let Some(full_name) = &update.full_name {
        builder.push(", full_name = ");
        builder.push_bind(full_name.clone());
    }
    if let Some(active) = update.is_active {
        builder.push(", is_active = ");
        builder.push_bind(active);
    }
    if let Some(verified) = update.is_email_verified {
        builder.push(", is_email_verified = ");
        builder.push_bind(verified);
    }
    if let Some(superuser) = update.is_superuser {
        builder.push(", is_superuser = ");
        builder.push_bind(superuser);
    }
    for (purpose, token) in [
        (OneTimePurpose::Verification, &update.verification_token),
        (OneTimePurpose::PasswordReset, &update.reset_token),
    ] {
        if let Some(token) = token {
            let (hash, expires_at) = match token {
                Some((hash, expires_at)) => (Some(hash.clone()), Some(*expires_at)),
                None => (None, None),
            };
            builder.push(format!(", {} = ", token_column(purpose)));
            builder.push_bind(hash);
            builder.push(format!(", {} = ", expiry_column(purpose)));
            builder.push_bind(expires_at);
        }
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id);
    if let Some(active) = update.when_active {
        builder.push(" AND is_active = ");
        builder.push_bind(active);
    }
    if let Some(verified) = update.when_verified {
        builder.push(" AND is_email_verified = ");
        builder.push_bind(verified);
    }
    if let Some((purpose, digest)) = &update.consuming {
        builder.push(format!(" AND {} = ", token_column(*purpose)));
        builder.push_bind(digest.clone());
    }

    builder.push(format!(" RETURNING {USER_COLUMNS}"));
    builder
}

/// User repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
    timeout: Duration,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl CredentialStore for UserRepository {
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        bounded(
            self.timeout,
            "get user by email",
            sqlx::query_as::<_, User>(&sql)
                .bind(email)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        bounded(
            self.timeout,
            "get user by id",
            sqlx::query_as::<_, User>(&sql)
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn get_by_token(
        &self,
        purpose: OneTimePurpose,
        token_hash: &str,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {} = $1",
            token_column(purpose)
        );
        bounded(
            self.timeout,
            "get user by one-time token",
            sqlx::query_as::<_, User>(&sql)
                .bind(token_hash)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn insert(&self, new_user: NewUser) -> StoreResult<User> {
        info!("Creating new user");

        let sql = format!(
            r#"
            INSERT INTO users (id, email, password_hash, is_active, is_email_verified,
                               verification_token_hash, verification_expires_at)
            VALUES ($1, $2, $3, FALSE, FALSE, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        bounded(
            self.timeout,
            "insert user",
            sqlx::query_as::<_, User>(&sql)
                .bind(Uuid::new_v4())
                .bind(&new_user.email)
                .bind(&new_user.password_hash)
                .bind(&new_user.verification_token_hash)
                .bind(new_user.verification_expires_at)
                .fetch_one(&self.pool),
        )
        .await
    }

    async fn update(&self, id: Uuid, update: &UserUpdate) -> StoreResult<Option<User>> {
        let mut builder = update_query(id, update);
        bounded(
            self.timeout,
            "update user",
            builder
                .build_query_as::<User>()
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn list(&self, offset: i64, limit: i64) -> StoreResult<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id OFFSET $1 LIMIT $2"
        );
        bounded(
            self.timeout,
            "list users",
            sqlx::query_as::<_, User>(&sql)
                .bind(offset)
                .bind(limit)
                .fetch_all(&self.pool),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_columns() {
        assert_eq!(
            token_column(OneTimePurpose::Verification),
            "verification_token_hash"
        );
        assert_eq!(token_column(OneTimePurpose::PasswordReset), "reset_token_hash");
    }

    #[test]
    fn test_update_query_writes_only_set_fields() {
        let id = Uuid::new_v4();
        let update = UserUpdate::new()
            .password("hash".to_string())
            .when_active(true);
        let sql = update_query(id, &update).into_sql();

        assert!(sql.starts_with("UPDATE users SET updated_at = NOW(), password_hash = $1"));
        assert!(sql.contains("WHERE id = $2 AND is_active = $3"));
        assert!(!sql.contains("is_active = $1"));
        assert!(!sql.contains("is_email_verified ="));
    }

    #[test]
    fn test_update_query_consumes_token() {
        let update = UserUpdate::new()
            .active(true)
            .email_verified(true)
            .one_time_token(OneTimePurpose::Verification, None)
            .consuming(OneTimePurpose::Verification, "digest");
        let sql = update_query(Uuid::new_v4(), &update).into_sql();

        assert!(sql.contains("verification_token_hash = $3, verification_expires_at = $4"));
        assert!(sql.contains("AND verification_token_hash = $6"));
        assert!(!sql.contains("reset_token_hash ="));
    }
}
