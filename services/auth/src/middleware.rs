//! Middleware for bearer access-token authentication

use axum::{
    Extension,
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use uuid::Uuid;

use crate::{AppState, error::AuthError};

/// User id proven by a valid access token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Uuid);

/// Require an access token and expose its subject to handlers
///
/// Refresh tokens are rejected here; they are only accepted by the refresh
/// and logout endpoints.
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(AuthError::InvalidToken)?;

    let user_id = state.auth.authenticate(bearer.token())?;

    // Add user ID to request extensions for use in handlers
    req.extensions_mut().insert(AuthenticatedUser(user_id));

    Ok(next.run(req).await)
}

/// Let only active superusers through; runs after [`auth_middleware`]
pub async fn superuser_middleware(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    state.auth.require_superuser(user_id).await?;
    Ok(next.run(req).await)
}
