//! Authentication lifecycle over the credential and session stores
//!
//! A user moves from pending verification to active once their emailed token
//! is consumed. Every login starts a refresh-token family that is rotated on
//! each refresh and ends on logout, expiry, or detected reuse.
//!
//! Only idempotent reads are retried on transient store failures. One-time
//! token consumption and session rotation are conditional writes and run once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{AuthError, AuthResult};
use crate::mail::MailDispatcher;
use crate::models::{NewUser, OneTimePurpose, TokenPair, User, UserUpdate};
use crate::one_time::{self, OneTimeToken};
use crate::password::PasswordHasher;
use crate::repositories::{CredentialStore, SessionStore, StoreResult};
use crate::session::{ReusePolicy, SessionManager};
use crate::tokens::TokenKind;
use crate::validation::normalize_email;

const READ_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Largest page returned by [`AuthService::list_users`]
pub const MAX_PAGE_SIZE: i64 = 100;

/// Outcome of a registration request
#[derive(Debug, Clone)]
pub enum Registration {
    /// A new pending user was stored
    Created(User),
    /// The email was already pending verification; a fresh link was sent
    VerificationResent(User),
}

impl Registration {
    pub fn user(&self) -> &User {
        match self {
            Registration::Created(user) | Registration::VerificationResent(user) => user,
        }
    }
}

/// Administrative changes to a user; `None` leaves a field as it is
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub full_name: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

/// Blank names clear the field
fn profile_name(full_name: &str) -> Option<String> {
    let trimmed = full_name.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Authentication service
pub struct AuthService {
    users: Arc<dyn CredentialStore>,
    sessions: SessionManager,
    passwords: PasswordHasher,
    mailer: Arc<dyn MailDispatcher>,
    settings: Arc<Settings>,
}

impl AuthService {
    /// Build the service, failing on unusable signing or hashing settings
    pub fn new(
        settings: Arc<Settings>,
        users: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        mailer: Arc<dyn MailDispatcher>,
    ) -> AuthResult<Self> {
        let tokens = crate::tokens::TokenService::from_settings(&settings)?;
        let passwords = PasswordHasher::from_settings(&settings)?;
        let sessions = SessionManager::new(sessions, tokens, ReusePolicy::from_settings(&settings));

        Ok(Self {
            users,
            sessions,
            passwords,
            mailer,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    async fn read<T, F, Fut>(&self, op: &'static str, mut call: F) -> AuthResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let max_attempts = self.settings.store_read_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        "Retrying {} after transient store failure ({}/{}): {}",
                        op, attempt, max_attempts, e
                    );
                    tokio::time::sleep(READ_RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn user_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let users = &self.users;
        self.read("get user by email", move || users.get_by_email(email))
            .await
    }

    async fn user_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        let users = &self.users;
        self.read("get user by id", move || users.get_by_id(id)).await
    }

    async fn user_by_token(&self, purpose: OneTimePurpose, digest: &str) -> AuthResult<Option<User>> {
        let users = &self.users;
        self.read("get user by one-time token", move || {
            users.get_by_token(purpose, digest)
        })
        .await
    }

    /// Look up the holder of an unexpired one-time token
    async fn redeemable(&self, purpose: OneTimePurpose, token: &str) -> AuthResult<(User, String)> {
        let digest = one_time::digest(token);
        let user = self
            .user_by_token(purpose, &digest)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let expires_at = user.one_time_token(purpose).and_then(|(_, expires)| expires);
        if expires_at.is_none_or(|expires| expires <= Utc::now()) {
            debug!("Rejected expired {} token for user {}", purpose.as_str(), user.id);
            return Err(AuthError::ExpiredToken);
        }

        Ok((user, digest))
    }

    fn ttl_hours(&self, purpose: OneTimePurpose) -> u64 {
        match purpose {
            OneTimePurpose::Verification => self.settings.verification_token_ttl_hours,
            OneTimePurpose::PasswordReset => self.settings.password_reset_token_ttl_hours,
        }
    }

    /// A fresh token for `purpose` and the update that stores its digest
    fn arm_one_time_token(&self, purpose: OneTimePurpose) -> (String, UserUpdate) {
        let issued = OneTimeToken::generate();
        let expires_at = Utc::now() + chrono::Duration::hours(self.ttl_hours(purpose) as i64);
        let update = UserUpdate::new().one_time_token(purpose, Some((issued.digest, expires_at)));
        (issued.token, update)
    }

    async fn send_one_time_mail(&self, user: &User, purpose: OneTimePurpose, token: &str) {
        let expiry = Settings::expiry_text(self.ttl_hours(purpose));

        let sent = match purpose {
            OneTimePurpose::Verification => {
                let link = format!("{}/auth/verify?token={token}", self.settings.public_base());
                self.mailer.send_verification(&user.email, &link, &expiry).await
            }
            OneTimePurpose::PasswordReset => {
                let link = format!("{}?token={token}", self.settings.password_reset_page());
                self.mailer.send_password_reset(&user.email, &link, &expiry).await
            }
        };

        if let Err(e) = sent {
            warn!(
                "Failed to dispatch {} mail for user {}: {}",
                purpose.as_str(),
                user.id,
                e
            );
        }
    }

    /// Register a new pending user and send the verification link
    ///
    /// Registering again with an email that is still pending only re-arms and
    /// resends its verification link. The stored password is kept, so whoever
    /// controls the inbox decides which password is activated.
    pub async fn register(&self, email: &str, password: &str) -> AuthResult<Registration> {
        let email = normalize_email(email);

        if let Some(user) = self.user_by_email(&email).await? {
            if user.is_email_verified {
                return Err(AuthError::DuplicateEmail);
            }

            let (token, update) = self.arm_one_time_token(OneTimePurpose::Verification);
            let Some(user) = self
                .users
                .update(user.id, &update.when_verified(false))
                .await?
            else {
                return Err(AuthError::DuplicateEmail);
            };
            info!("Re-sent verification for pending user: {}", user.id);

            self.send_one_time_mail(&user, OneTimePurpose::Verification, &token)
                .await;
            return Ok(Registration::VerificationResent(user));
        }

        let password_hash = self.passwords.hash(password).await?;
        let issued = OneTimeToken::generate();
        let expires_at = Utc::now()
            + chrono::Duration::hours(self.settings.verification_token_ttl_hours as i64);

        let user = self
            .users
            .insert(NewUser {
                email,
                password_hash,
                verification_token_hash: issued.digest,
                verification_expires_at: expires_at,
            })
            .await?;
        info!("Registered user: {}", user.id);

        self.send_one_time_mail(&user, OneTimePurpose::Verification, &issued.token)
            .await;
        Ok(Registration::Created(user))
    }

    fn is_bootstrap_superuser(&self, email: &str) -> bool {
        self.settings
            .bootstrap_superuser_email
            .as_deref()
            .is_some_and(|bootstrap| normalize_email(bootstrap) == email)
    }

    /// Consume a verification token and activate its user
    pub async fn verify_email(&self, token: &str) -> AuthResult<User> {
        let (user, digest) = self.redeemable(OneTimePurpose::Verification, token).await?;

        let mut update = UserUpdate::new()
            .active(true)
            .email_verified(true)
            .one_time_token(OneTimePurpose::Verification, None)
            .consuming(OneTimePurpose::Verification, digest);
        if self.is_bootstrap_superuser(&user.email) {
            info!("Promoting bootstrap superuser: {}", user.id);
            update = update.superuser(true);
        }

        let user = self
            .users
            .update(user.id, &update)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        info!("Verified email for user: {}", user.id);
        Ok(user)
    }

    /// Send a fresh verification link; silent for unknown or verified emails
    pub async fn resend_verification(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        let Some(user) = self.user_by_email(&email).await? else {
            debug!("Verification resend for unknown email ignored");
            return Ok(());
        };
        if user.is_email_verified {
            debug!("Verification resend for verified user {} ignored", user.id);
            return Ok(());
        }

        let (token, update) = self.arm_one_time_token(OneTimePurpose::Verification);
        let Some(user) = self
            .users
            .update(user.id, &update.when_verified(false))
            .await?
        else {
            debug!("User {} verified before the resend was stored", user.id);
            return Ok(());
        };

        self.send_one_time_mail(&user, OneTimePurpose::Verification, &token)
            .await;
        Ok(())
    }

    /// Check credentials and start a new session
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<TokenPair> {
        let email = normalize_email(email);
        let user = self.user_by_email(&email).await?;

        // The hash check runs even for unknown users so every failure costs the same.
        let password_ok = self
            .passwords
            .verify(password, user.as_ref().map(|u| u.password_hash.as_str()))
            .await?;

        let user = match user {
            Some(user) if password_ok && user.is_active => user,
            _ => return Err(AuthError::InvalidCredentials),
        };

        let pair = self.sessions.create_session(user.id).await?;
        info!("User logged in: {}", user.id);
        Ok(pair)
    }

    /// Rotate a refresh token into a new pair
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let claims = self.sessions.verify_refresh(refresh_token)?;

        match self.user_by_id(claims.sub).await? {
            Some(user) if user.is_active => {}
            _ => {
                debug!("Refresh for inactive or missing user {}", claims.sub);
                self.sessions.delete_session(claims.jti).await?;
                return Err(AuthError::InvalidSession);
            }
        }

        self.sessions.rotate_session(&claims).await
    }

    /// Revoke the session behind a refresh token; repeated calls are no-ops
    pub async fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        let claims = self.sessions.verify_refresh(refresh_token)?;
        if !self.sessions.delete_session(claims.jti).await? {
            debug!("Logout for inactive session {}", claims.jti);
        }
        Ok(())
    }

    /// Revoke every session of a user
    pub async fn logout_all(&self, user_id: Uuid) -> AuthResult<u64> {
        self.sessions.delete_all_sessions(user_id).await
    }

    /// Resolve an access token to its user id
    pub fn authenticate(&self, access_token: &str) -> AuthResult<Uuid> {
        self.sessions
            .tokens()
            .verify(access_token, TokenKind::Access)
            .map(|claims| claims.sub)
    }

    pub async fn current_user(&self, user_id: Uuid) -> AuthResult<User> {
        self.user_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidToken)
    }

    /// Replace the password after checking the current one, then end all sessions
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let user = self.current_user(user_id).await?;

        if !self
            .passwords
            .verify(current_password, Some(user.password_hash.as_str()))
            .await?
        {
            return Err(AuthError::InvalidCredentials);
        }

        let password_hash = self.passwords.hash(new_password).await?;
        let update = UserUpdate::new().password(password_hash).when_active(true);
        if self.users.update(user.id, &update).await?.is_none() {
            debug!("Password change for inactive user {} refused", user.id);
            return Err(AuthError::InvalidCredentials);
        }
        self.sessions.delete_all_sessions(user.id).await?;

        info!("Changed password for user: {}", user.id);
        Ok(())
    }

    /// Set or clear the caller's display name
    pub async fn update_profile(&self, user_id: Uuid, full_name: &str) -> AuthResult<User> {
        let update = UserUpdate::new().full_name(profile_name(full_name));
        self.users
            .update(user_id, &update)
            .await?
            .ok_or(AuthError::InvalidToken)
    }

    /// Email a reset link to an active user; silent otherwise
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        let user = match self.user_by_email(&email).await? {
            Some(user) if user.is_active => user,
            _ => {
                debug!("Password reset for unknown or inactive email ignored");
                return Ok(());
            }
        };

        let (token, update) = self.arm_one_time_token(OneTimePurpose::PasswordReset);
        let Some(user) = self
            .users
            .update(user.id, &update.when_active(true))
            .await?
        else {
            debug!("User {} was deactivated before the reset was stored", user.id);
            return Ok(());
        };
        info!("Password reset requested for user: {}", user.id);

        self.send_one_time_mail(&user, OneTimePurpose::PasswordReset, &token)
            .await;
        Ok(())
    }

    /// Check a reset token without consuming it, for the page behind the emailed link
    pub async fn check_password_reset(&self, token: &str) -> AuthResult<()> {
        let (user, _) = self
            .redeemable(OneTimePurpose::PasswordReset, token)
            .await?;
        if !user.is_active {
            return Err(AuthError::InvalidToken);
        }
        Ok(())
    }

    /// Consume a reset token, set the new password and end all sessions
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        let (user, digest) = self
            .redeemable(OneTimePurpose::PasswordReset, token)
            .await?;
        if !user.is_active {
            return Err(AuthError::InvalidToken);
        }

        let password_hash = self.passwords.hash(new_password).await?;
        let update = UserUpdate::new()
            .password(password_hash)
            .one_time_token(OneTimePurpose::PasswordReset, None)
            .when_active(true)
            .consuming(OneTimePurpose::PasswordReset, digest);
        if self.users.update(user.id, &update).await?.is_none() {
            return Err(AuthError::InvalidToken);
        }
        self.sessions.delete_all_sessions(user.id).await?;

        info!("Reset password for user: {}", user.id);
        Ok(())
    }

    fn deactivation() -> UserUpdate {
        UserUpdate::new()
            .active(false)
            .one_time_token(OneTimePurpose::PasswordReset, None)
    }

    /// Soft-disable a user and end all of their sessions
    pub async fn deactivate(&self, user_id: Uuid) -> AuthResult<User> {
        let user = self
            .users
            .update(user_id, &Self::deactivation())
            .await?
            .ok_or(AuthError::InvalidToken)?;
        self.sessions.delete_all_sessions(user.id).await?;

        info!("Deactivated user: {}", user.id);
        Ok(user)
    }

    /// The caller, if it is an active superuser
    pub async fn require_superuser(&self, user_id: Uuid) -> AuthResult<User> {
        match self.user_by_id(user_id).await? {
            Some(user) if user.is_active && user.is_superuser => Ok(user),
            Some(user) => {
                debug!("User {} is not an active superuser", user.id);
                Err(AuthError::Forbidden)
            }
            None => Err(AuthError::InvalidToken),
        }
    }

    /// One page of users, oldest first; `limit` is clamped to [`MAX_PAGE_SIZE`]
    pub async fn list_users(&self, skip: i64, limit: i64) -> AuthResult<Vec<User>> {
        let (offset, limit) = (skip.max(0), limit.clamp(1, MAX_PAGE_SIZE));
        let users = &self.users;
        self.read("list users", move || users.list(offset, limit))
            .await
    }

    pub async fn get_user(&self, user_id: Uuid) -> AuthResult<User> {
        self.user_by_id(user_id).await?.ok_or(AuthError::NotFound)
    }

    /// Apply administrative changes
    ///
    /// Disabling ends every session of the user. Only an account with a
    /// verified email can be re-enabled.
    pub async fn update_user(&self, user_id: Uuid, changes: UserChanges) -> AuthResult<User> {
        let mut update = match changes.is_active {
            Some(false) => Self::deactivation(),
            Some(true) => UserUpdate::new().active(true).when_verified(true),
            None => UserUpdate::new(),
        };
        if let Some(full_name) = &changes.full_name {
            update = update.full_name(profile_name(full_name));
        }
        if let Some(superuser) = changes.is_superuser {
            update = update.superuser(superuser);
        }

        let Some(user) = self.users.update(user_id, &update).await? else {
            return match self.user_by_id(user_id).await? {
                Some(_) => Err(AuthError::Validation(
                    "an account with an unverified email cannot be enabled".to_string(),
                )),
                None => Err(AuthError::NotFound),
            };
        };

        if changes.is_active == Some(false) {
            self.sessions.delete_all_sessions(user.id).await?;
        }
        info!("Updated user: {}", user.id);
        Ok(user)
    }

    /// Delete sessions expired for longer than the retention period
    pub async fn purge_expired_sessions(&self) -> AuthResult<u64> {
        let retention = chrono::Duration::seconds(self.settings.session_retention_secs as i64);
        self.sessions
            .cleanup_expired_sessions(Utc::now() - retention)
            .await
    }
}
