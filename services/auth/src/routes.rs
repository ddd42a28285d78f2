//! Authentication service routes

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    AppState,
    error::{AuthError, AuthResult},
    middleware::{AuthenticatedUser, auth_middleware, superuser_middleware},
    service::{Registration, UserChanges},
    validation::{
        normalize_email, validate_email, validate_full_name, validate_password,
        validate_password_present,
    },
};

/// Request for user registration
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

/// Response for user registration
#[derive(Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub email: String,
    pub message: String,
}

/// Request for user login
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request carrying a refresh token (refresh and logout)
#[derive(Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct VerifyQuery {
    pub token: String,
}

/// Request naming an account by email (resend verification, forgot password)
#[derive(Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ProfileRequest {
    pub full_name: String,
}

fn default_limit() -> i64 {
    100
}

/// Paging for the user list
#[derive(Deserialize)]
pub struct ListUsersQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

/// Administrative user update; absent fields are left as they are
#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn message(text: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.to_string(),
    })
}

fn validated(result: Result<(), String>) -> AuthResult<()> {
    result.map_err(AuthError::Validation)
}

/// Create the router for the authentication service
pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/users", get(list_users))
        .route(
            "/users/:user_id",
            get(get_user).patch(update_user).delete(disable_user),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            superuser_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let protected = Router::new()
        .route("/auth/logout-all", post(logout_all))
        .route("/auth/me", get(me).patch(update_profile))
        .route("/auth/password/change", post(change_password))
        .route("/auth/deactivate", post(deactivate))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(register))
        .route("/auth/verify", get(verify_email))
        .route("/auth/verify/resend", post(resend_verification))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh_token))
        .route("/auth/logout", post(logout))
        .route("/auth/password/forgot", post(forgot_password))
        .route(
            "/auth/password/reset",
            get(check_reset_link).post(reset_password),
        )
        .merge(protected)
        .merge(admin)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "auth-service"
    }))
}

/// User registration endpoint
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AuthResult<impl IntoResponse> {
    validated(validate_email(&payload.email))?;
    validated(validate_password(&payload.password))?;

    let registration = state.auth.register(&payload.email, &payload.password).await?;
    let status = match registration {
        Registration::Created(_) => StatusCode::CREATED,
        Registration::VerificationResent(_) => StatusCode::OK,
    };
    let user = registration.user();

    Ok((
        status,
        Json(RegisterResponse {
            user_id: user.id,
            email: user.email.clone(),
            message: "Check your inbox to verify your email".to_string(),
        }),
    ))
}

/// Email verification endpoint, reached from the emailed link
pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> AuthResult<impl IntoResponse> {
    let user = state.auth.verify_email(&query.token).await?;
    info!("Email verified for user: {}", user.id);
    Ok(message("Email verified, you can now log in"))
}

pub async fn resend_verification(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> AuthResult<impl IntoResponse> {
    validated(validate_email(&payload.email))?;
    state.auth.resend_verification(&payload.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        message("If the account is pending verification, a new link is on its way"),
    ))
}

/// User login endpoint
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AuthResult<impl IntoResponse> {
    validated(validate_email(&payload.email))?;
    validated(validate_password_present(&payload.password))?;

    let key = normalize_email(&payload.email);
    if !state.rate_limiter.is_allowed(&key).await {
        return Err(AuthError::RateLimited);
    }

    let pair = state.auth.login(&key, &payload.password).await?;
    state.rate_limiter.reset(&key).await;

    Ok(Json(pair))
}

/// Refresh token endpoint
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> AuthResult<impl IntoResponse> {
    let pair = state.auth.refresh(&payload.refresh_token).await?;
    Ok(Json(pair))
}

/// Logout endpoint
pub async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> AuthResult<impl IntoResponse> {
    state.auth.logout(&payload.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Logout from all devices
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> AuthResult<impl IntoResponse> {
    let revoked = state.auth.logout_all(user_id).await?;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> AuthResult<impl IntoResponse> {
    let user = state.auth.current_user(user_id).await?;
    Ok(Json(user))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Json(payload): Json<ProfileRequest>,
) -> AuthResult<impl IntoResponse> {
    validated(validate_full_name(&payload.full_name))?;
    let user = state.auth.update_profile(user_id, &payload.full_name).await?;
    Ok(Json(user))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Json(payload): Json<ChangePasswordRequest>,
) -> AuthResult<impl IntoResponse> {
    validated(validate_password_present(&payload.current_password))?;
    validated(validate_password(&payload.new_password))?;

    state
        .auth
        .change_password(user_id, &payload.current_password, &payload.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> AuthResult<impl IntoResponse> {
    validated(validate_email(&payload.email))?;
    state.auth.request_password_reset(&payload.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        message("If the account exists, a reset link is on its way"),
    ))
}

/// Landing point of the emailed reset link
pub async fn check_reset_link(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> AuthResult<impl IntoResponse> {
    state.auth.check_password_reset(&query.token).await?;
    Ok(message(
        "Link is valid, POST the token with new_password to this address",
    ))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AuthResult<impl IntoResponse> {
    validated(validate_password(&payload.new_password))?;
    state
        .auth
        .reset_password(&payload.token, &payload.new_password)
        .await?;
    Ok(message("Password updated, please log in again"))
}

/// Soft-disable the calling account
pub async fn deactivate(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> AuthResult<impl IntoResponse> {
    state.auth.deactivate(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> AuthResult<impl IntoResponse> {
    let users = state.auth.list_users(query.skip, query.limit).await?;
    Ok(Json(users))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AuthResult<impl IntoResponse> {
    let user = state.auth.get_user(user_id).await?;
    Ok(Json(user))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> AuthResult<impl IntoResponse> {
    if let Some(full_name) = &payload.full_name {
        validated(validate_full_name(full_name))?;
    }

    let changes = UserChanges {
        full_name: payload.full_name,
        is_active: payload.is_active,
        is_superuser: payload.is_superuser,
    };
    let user = state.auth.update_user(user_id, changes).await?;
    Ok(Json(user))
}

/// Users are never hard-deleted; `DELETE` soft-disables the account
pub async fn disable_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AuthResult<impl IntoResponse> {
    let changes = UserChanges {
        is_active: Some(false),
        ..UserChanges::default()
    };
    state.auth.update_user(user_id, changes).await?;
    Ok(StatusCode::NO_CONTENT)
}
