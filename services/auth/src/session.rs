//! Session management over the session store
//!
//! Every refresh token is backed by exactly one session row keyed by its
//! `jti`. Rotation swaps that row for a new one in a single store call.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{AuthError, AuthResult};
use crate::models::{NewSession, Session, TokenPair};
use crate::repositories::SessionStore;
use crate::tokens::{Claims, IssuedToken, TokenKind, TokenService};

/// What happens when a rotated-out refresh token is presented again
#[derive(Debug, Clone, Copy)]
pub struct ReusePolicy {
    /// Revoke every session of the user
    pub revoke_family: bool,
    /// A replay this soon after rotation, while the replacement is still
    /// unused, is a duplicate submit and only gets rejected
    pub grace: Duration,
}

impl ReusePolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            revoke_family: settings.revoke_family_on_reuse,
            grace: Duration::seconds(settings.refresh_reuse_grace_secs as i64),
        }
    }

    fn within_grace(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session
            .revoked_at
            .is_some_and(|revoked_at| now - revoked_at < self.grace)
    }
}

/// Session manager for issuing, rotating and revoking refresh-token sessions
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    tokens: TokenService,
    reuse: ReusePolicy,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(store: Arc<dyn SessionStore>, tokens: TokenService, reuse: ReusePolicy) -> Self {
        Self {
            store,
            tokens,
            reuse,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    fn pair(&self, access: IssuedToken, refresh: IssuedToken) -> TokenPair {
        TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_ttl_secs(),
            refresh_expires_at: refresh.expires_at,
        }
    }

    fn next_session(user_id: Uuid, refresh: &IssuedToken) -> NewSession {
        NewSession {
            user_id,
            jti: refresh.jti,
            issued_at: refresh.issued_at,
            expires_at: refresh.expires_at,
        }
    }

    /// Issue a new access/refresh pair and persist the refresh session
    pub async fn create_session(&self, user_id: Uuid) -> AuthResult<TokenPair> {
        let access = self.tokens.issue(user_id, TokenKind::Access)?;
        let refresh = self.tokens.issue(user_id, TokenKind::Refresh)?;

        self.store
            .create(Self::next_session(user_id, &refresh))
            .await?;

        info!("Created session for user: {}", user_id);
        Ok(self.pair(access, refresh))
    }

    /// Verify a presented refresh token
    pub fn verify_refresh(&self, token: &str) -> AuthResult<Claims> {
        self.tokens.verify(token, TokenKind::Refresh)
    }

    /// Exchange the session behind `claims` for a new one
    ///
    /// The revoke of the old session and the insert of the new one happen in a
    /// single store call, so of two concurrent rotations of the same token at
    /// most one succeeds. The write is never retried.
    pub async fn rotate_session(&self, claims: &Claims) -> AuthResult<TokenPair> {
        let access = self.tokens.issue(claims.sub, TokenKind::Access)?;
        let refresh = self.tokens.issue(claims.sub, TokenKind::Refresh)?;

        let rotated = self
            .store
            .rotate(
                claims.jti,
                claims.sub,
                Self::next_session(claims.sub, &refresh),
            )
            .await?;

        match rotated {
            Some(session) => {
                info!("Rotated session for user: {}", session.user_id);
                Ok(self.pair(access, refresh))
            }
            None => {
                self.reject_stale(claims).await;
                Err(AuthError::InvalidSession)
            }
        }
    }

    /// A rotated-out token coming back means the token family may be stolen
    async fn reject_stale(&self, claims: &Claims) {
        let session = match self.store.find(claims.jti).await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to inspect rejected session: {}", e);
                return;
            }
        };

        let Some(session) = session.filter(Session::was_rotated) else {
            return;
        };

        if self.reuse.within_grace(&session, Utc::now()) && self.successor_unused(&session).await {
            debug!(
                "Duplicate refresh of session {} inside the grace window",
                session.jti
            );
            return;
        }

        warn!(
            "Refresh token reuse detected for user: {}",
            session.user_id
        );
        if self.reuse.revoke_family {
            match self.store.revoke_all(session.user_id).await {
                Ok(count) => warn!(
                    "Revoked {} sessions for user {} after token reuse",
                    count, session.user_id
                ),
                Err(e) => error!("Failed to revoke sessions after token reuse: {}", e),
            }
        }
    }

    async fn successor_unused(&self, session: &Session) -> bool {
        let Some(next) = session.replaced_by else {
            return false;
        };
        matches!(self.store.find_active(next).await, Ok(Some(_)))
    }

    /// Get the active session for a refresh token id
    pub async fn find_active(&self, jti: Uuid) -> AuthResult<Option<Session>> {
        Ok(self.store.find_active(jti).await?)
    }

    /// Revoke a single session; unknown or already revoked is not an error
    pub async fn delete_session(&self, jti: Uuid) -> AuthResult<bool> {
        let revoked = self.store.revoke(jti).await?;
        if revoked {
            info!("Revoked session: {}", jti);
        }
        Ok(revoked)
    }

    /// Revoke all sessions for a user (logout from all devices)
    pub async fn delete_all_sessions(&self, user_id: Uuid) -> AuthResult<u64> {
        let count = self.store.revoke_all(user_id).await?;
        info!("Revoked {} sessions for user: {}", count, user_id);
        Ok(count)
    }

    /// Delete sessions that expired before `before`
    pub async fn cleanup_expired_sessions(&self, before: DateTime<Utc>) -> AuthResult<u64> {
        let purged = self.store.purge_expired(before).await?;
        if purged > 0 {
            info!("Purged {} expired sessions", purged);
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::MemorySessionStore;

    fn manager_with(store: MemorySessionStore, revoke_family: bool, grace_secs: i64) -> SessionManager {
        let tokens = TokenService::from_settings(&Settings {
            jwt_secret: Some("session-test-secret-long-enough-0000".to_string()),
            ..Settings::default()
        })
        .unwrap();
        let reuse = ReusePolicy {
            revoke_family,
            grace: Duration::seconds(grace_secs),
        };
        SessionManager::new(Arc::new(store), tokens, reuse)
    }

    fn manager(store: MemorySessionStore, revoke_family: bool) -> SessionManager {
        manager_with(store, revoke_family, 0)
    }

    #[tokio::test]
    async fn test_create_session_persists_refresh_jti() {
        let store = MemorySessionStore::new();
        let sessions = manager(store.clone(), true);
        let user_id = Uuid::new_v4();

        let pair = sessions.create_session(user_id).await.unwrap();
        let claims = sessions.verify_refresh(&pair.refresh_token).unwrap();

        let session = sessions.find_active(claims.jti).await.unwrap().unwrap();
        assert_eq!(session.user_id, user_id);
        assert_eq!(store.active_count(user_id).await, 1);
    }

    #[tokio::test]
    async fn test_access_token_has_no_session() {
        let sessions = manager(MemorySessionStore::new(), true);
        let pair = sessions.create_session(Uuid::new_v4()).await.unwrap();
        let access = sessions
            .tokens()
            .verify(&pair.access_token, TokenKind::Access)
            .unwrap();

        assert!(sessions.find_active(access.jti).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reuse_revokes_family_when_enabled() {
        let store = MemorySessionStore::new();
        let sessions = manager(store.clone(), true);
        let user_id = Uuid::new_v4();

        let first = sessions.create_session(user_id).await.unwrap();
        let other_device = sessions.create_session(user_id).await.unwrap();
        let first_claims = sessions.verify_refresh(&first.refresh_token).unwrap();
        sessions.rotate_session(&first_claims).await.unwrap();

        let replay = sessions.rotate_session(&first_claims).await;
        assert!(matches!(replay, Err(AuthError::InvalidSession)));
        assert_eq!(store.active_count(user_id).await, 0);

        let other_claims = sessions.verify_refresh(&other_device.refresh_token).unwrap();
        assert!(sessions.find_active(other_claims.jti).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reuse_keeps_family_when_disabled() {
        let store = MemorySessionStore::new();
        let sessions = manager(store.clone(), false);
        let user_id = Uuid::new_v4();

        let first = sessions.create_session(user_id).await.unwrap();
        let claims = sessions.verify_refresh(&first.refresh_token).unwrap();
        sessions.rotate_session(&claims).await.unwrap();

        assert!(sessions.rotate_session(&claims).await.is_err());
        assert_eq!(store.active_count(user_id).await, 1);
    }

    #[tokio::test]
    async fn test_logged_out_token_is_not_treated_as_reuse() {
        let store = MemorySessionStore::new();
        let sessions = manager(store.clone(), true);
        let user_id = Uuid::new_v4();

        let kept = sessions.create_session(user_id).await.unwrap();
        let dropped = sessions.create_session(user_id).await.unwrap();
        let dropped_claims = sessions.verify_refresh(&dropped.refresh_token).unwrap();

        assert!(sessions.delete_session(dropped_claims.jti).await.unwrap());
        assert!(!sessions.delete_session(dropped_claims.jti).await.unwrap());
        assert!(sessions.rotate_session(&dropped_claims).await.is_err());

        let kept_claims = sessions.verify_refresh(&kept.refresh_token).unwrap();
        assert!(sessions.find_active(kept_claims.jti).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_refresh_inside_grace_keeps_successor() {
        let store = MemorySessionStore::new();
        let sessions = manager_with(store.clone(), true, 30);
        let user_id = Uuid::new_v4();

        let first = sessions.create_session(user_id).await.unwrap();
        let claims = sessions.verify_refresh(&first.refresh_token).unwrap();
        let winner = sessions.rotate_session(&claims).await.unwrap();

        assert!(matches!(
            sessions.rotate_session(&claims).await,
            Err(AuthError::InvalidSession)
        ));
        let winner_claims = sessions.verify_refresh(&winner.refresh_token).unwrap();
        assert!(sessions.find_active(winner_claims.jti).await.unwrap().is_some());

        // Once the successor has been used, the same replay is theft again.
        sessions.rotate_session(&winner_claims).await.unwrap();
        assert!(sessions.rotate_session(&claims).await.is_err());
        assert_eq!(store.active_count(user_id).await, 0);
    }
}
