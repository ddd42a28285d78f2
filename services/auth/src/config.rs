//! Service settings loaded once at startup
//!
//! Every key is read from the environment with the `AUTH_` prefix, e.g.
//! `AUTH_JWT_SECRET` or `AUTH_ACCESS_TOKEN_TTL_SECS`. The resulting
//! [`Settings`] is immutable and shared by reference with the token and auth
//! services; nothing re-reads the environment per request.

use config::{Config, Environment};
use serde::Deserialize;

use crate::error::AuthError;

/// Minimum HMAC secret length accepted for the `HS*` algorithms
pub const MIN_SECRET_LEN: usize = 32;

/// Authentication service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Socket address the HTTP server binds to
    pub bind_address: String,
    /// Public base URL used to build verification and reset links
    pub base_url: String,
    /// Page that collects the new password; the reset link points here when
    /// set, otherwise at this service's own `GET /auth/password/reset`
    pub password_reset_url: Option<String>,
    /// Product name used in outgoing mail
    pub app_title: String,

    /// JWT signing algorithm, e.g. `HS256` or `RS256`
    pub jwt_algorithm: String,
    /// HMAC secret for the `HS*` algorithms
    pub jwt_secret: Option<String>,
    /// PEM private key (inline or file path) for asymmetric algorithms
    pub jwt_private_key: Option<String>,
    /// PEM public key (inline or file path) for asymmetric algorithms
    pub jwt_public_key: Option<String>,
    /// Access token lifetime in seconds (default: 15 minutes)
    pub access_token_ttl_secs: u64,
    /// Refresh token lifetime in seconds (default: 7 days)
    pub refresh_token_ttl_secs: u64,

    /// Email verification token lifetime in hours
    pub verification_token_ttl_hours: u64,
    /// Password reset token lifetime in hours
    pub password_reset_token_ttl_hours: u64,

    /// Argon2 memory cost in KiB
    pub password_memory_kib: u32,
    /// Argon2 iteration count
    pub password_iterations: u32,
    /// Argon2 lanes
    pub password_parallelism: u32,

    /// Upper bound for a single store call, in milliseconds
    pub store_timeout_ms: u64,
    /// Attempts for idempotent store reads that hit a transient failure
    pub store_read_attempts: u32,
    /// Revoke every session of a user when a rotated-out refresh token is replayed
    pub revoke_family_on_reuse: bool,
    /// Seconds after a rotation during which replaying the old token, while
    /// the new one is still unused, is rejected without revoking the family
    pub refresh_reuse_grace_secs: u64,
    /// How long expired sessions are retained before purge, in seconds
    pub session_retention_secs: u64,
    /// Interval between session purge runs, in seconds
    pub session_purge_interval_secs: u64,

    /// Login attempts allowed per email within the window
    pub login_max_attempts: u32,
    /// Login rate-limit window in seconds
    pub login_window_secs: u64,
    /// Cool-down once the limit is exceeded, in seconds
    pub login_ban_secs: u64,

    /// Queue outgoing mail in Redis instead of only logging it
    pub mail_queue_enabled: bool,
    /// HTTP endpoint of the mail delivery API drained by the worker
    pub mail_api_url: Option<String>,
    /// Bearer key for the mail delivery API
    pub mail_api_key: Option<String>,
    /// Delivery attempts per message
    pub mail_max_attempts: u32,
    /// Delay before a failed delivery is retried, in seconds
    pub mail_retry_delay_secs: u64,

    /// Email promoted to superuser when it completes verification
    pub bootstrap_superuser_email: Option<String>,

    /// Apply embedded migrations at startup
    pub run_migrations: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            base_url: "http://localhost:3000".to_string(),
            password_reset_url: None,
            app_title: "Auth Service".to_string(),
            jwt_algorithm: "HS256".to_string(),
            jwt_secret: None,
            jwt_private_key: None,
            jwt_public_key: None,
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 604_800,
            verification_token_ttl_hours: 24,
            password_reset_token_ttl_hours: 1,
            password_memory_kib: 19_456,
            password_iterations: 2,
            password_parallelism: 1,
            store_timeout_ms: 5_000,
            store_read_attempts: 3,
            revoke_family_on_reuse: true,
            refresh_reuse_grace_secs: 10,
            session_retention_secs: 86_400,
            session_purge_interval_secs: 3_600,
            login_max_attempts: 5,
            login_window_secs: 300,
            login_ban_secs: 900,
            mail_queue_enabled: false,
            mail_api_url: None,
            mail_api_key: None,
            mail_max_attempts: 3,
            mail_retry_delay_secs: 60,
            bootstrap_superuser_email: None,
            run_migrations: true,
        }
    }
}

impl Settings {
    /// Load settings from `AUTH_*` environment variables and validate them
    pub fn from_env() -> Result<Self, AuthError> {
        let settings: Settings = Config::builder()
            .add_source(Environment::with_prefix("AUTH").try_parsing(true))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| AuthError::Configuration(format!("failed to load settings: {e}")))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the service must not start with
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.access_token_ttl_secs == 0 || self.refresh_token_ttl_secs == 0 {
            return Err(AuthError::Configuration(
                "token lifetimes must be greater than zero".to_string(),
            ));
        }
        if self.access_token_ttl_secs >= self.refresh_token_ttl_secs {
            return Err(AuthError::Configuration(
                "access token lifetime must be shorter than refresh token lifetime".to_string(),
            ));
        }
        if self.verification_token_ttl_hours == 0 || self.password_reset_token_ttl_hours == 0 {
            return Err(AuthError::Configuration(
                "one-time token lifetimes must be greater than zero".to_string(),
            ));
        }
        if self.store_read_attempts == 0 {
            return Err(AuthError::Configuration(
                "store_read_attempts must be at least 1".to_string(),
            ));
        }
        let urls = [
            ("base_url", Some(&self.base_url)),
            ("password_reset_url", self.password_reset_url.as_ref()),
        ];
        for (key, url) in urls {
            let Some(url) = url else { continue };
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AuthError::Configuration(format!(
                    "{key} must be an http(s) URL, got {url}"
                )));
            }
        }
        if self.mail_queue_enabled && self.mail_api_url.is_none() {
            return Err(AuthError::Configuration(
                "mail_api_url is required when mail_queue_enabled is set".to_string(),
            ));
        }
        Ok(())
    }

    /// Human readable lifetime for mail bodies, e.g. "1 hour" or "24 hours"
    pub fn expiry_text(hours: u64) -> String {
        if hours == 1 {
            "1 hour".to_string()
        } else {
            format!("{hours} hours")
        }
    }

    /// Base URL without a trailing slash
    pub fn public_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Where the emailed reset link sends the user
    pub fn password_reset_page(&self) -> String {
        match &self.password_reset_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}/auth/password/reset", self.public_base()),
        }
    }
}
