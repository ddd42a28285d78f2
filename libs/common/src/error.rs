//! Infrastructure error types shared by the services

use sqlx::{Error as SqlxError, migrate::MigrateError};
use thiserror::Error;

/// Failures while bootstrapping or checking the database
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The pool could not reach the server
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// An embedded migration failed to apply
    #[error("Database migration error: {0}")]
    Migration(#[from] MigrateError),

    /// Missing or inconsistent `DATABASE_*` settings
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
