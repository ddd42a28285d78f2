//! Error taxonomy for the authentication service

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::repositories::StoreError;

/// Unique constraint guarding `users.email`
const USERS_EMAIL_KEY: &str = "users_email_key";

/// Authentication failures surfaced to the HTTP layer
#[derive(Error, Debug)]
pub enum AuthError {
    /// Registration with an email that already belongs to a verified account
    #[error("email already registered")]
    DuplicateEmail,

    /// Unknown email, inactive account or password mismatch
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Bad signature, malformed token, expired signed token, or an unknown
    /// or already used one-time token
    #[error("invalid token")]
    InvalidToken,

    /// One-time token (verification or reset) past its expiry
    #[error("token expired")]
    ExpiredToken,

    /// Access token presented where a refresh token is required, or the reverse
    #[error("wrong token kind")]
    WrongKind,

    /// Refresh token whose session is missing, revoked or expired
    #[error("invalid session")]
    InvalidSession,

    /// Authenticated, but not allowed to use this resource
    #[error("forbidden")]
    Forbidden,

    /// Addressed record does not exist
    #[error("not found")]
    NotFound,

    /// Transient infrastructure failure
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Fatal startup misconfiguration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Request payload failed shape validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// Too many attempts for the same key
    #[error("too many attempts")]
    RateLimited,

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Whether a caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::StoreUnavailable(_) | AuthError::RateLimited)
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AuthError::StoreUnavailable(msg),
            StoreError::UniqueViolation(constraint) if constraint == USERS_EMAIL_KEY => {
                AuthError::DuplicateEmail
            }
            StoreError::UniqueViolation(constraint) => {
                AuthError::Internal(format!("unique constraint violated: {constraint}"))
            }
            StoreError::Query(msg) => AuthError::Internal(msg),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::DuplicateEmail => (
                StatusCode::CONFLICT,
                "duplicate_email",
                "Email already registered".to_string(),
            ),
            AuthError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "Incorrect email or password".to_string(),
            ),
            AuthError::InvalidToken | AuthError::WrongKind | AuthError::InvalidSession => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Unauthorized".to_string(),
            ),
            AuthError::ExpiredToken => (
                StatusCode::GONE,
                "token_expired",
                "This link has expired, please request a new one".to_string(),
            ),
            AuthError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "Not allowed".to_string(),
            ),
            AuthError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "Not found".to_string(),
            ),
            AuthError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                msg.clone(),
            ),
            AuthError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many attempts, try again later".to_string(),
            ),
            AuthError::StoreUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "Service temporarily unavailable".to_string(),
            ),
            AuthError::Configuration(_) | AuthError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

/// Type alias for auth results
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_failures_share_one_response() {
        let statuses: Vec<StatusCode> = [
            AuthError::InvalidToken,
            AuthError::WrongKind,
            AuthError::InvalidSession,
        ]
        .into_iter()
        .map(|e| e.into_response().status())
        .collect();

        assert!(statuses.iter().all(|s| *s == StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_expired_one_time_token_is_distinct() {
        let response = AuthError::ExpiredToken.into_response();
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            AuthError::from(StoreError::Unavailable("timeout".into())),
            AuthError::StoreUnavailable(_)
        ));
        assert!(matches!(
            AuthError::from(StoreError::UniqueViolation("users_email_key".into())),
            AuthError::DuplicateEmail
        ));
        assert!(matches!(
            AuthError::from(StoreError::UniqueViolation("sessions_jti_key".into())),
            AuthError::Internal(_)
        ));
        assert!(AuthError::StoreUnavailable("x".into()).is_retryable());
        assert!(!AuthError::InvalidSession.is_retryable());
    }
}
