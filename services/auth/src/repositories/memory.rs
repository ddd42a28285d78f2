//! In-process stores for tests and local development
//!
//! Each store keeps its records behind a single `tokio::sync::Mutex`, so every
//! trait call, including `rotate`, is atomic with respect to the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CredentialStore, SessionStore, StoreError, StoreResult};
use crate::models::{NewSession, NewUser, OneTimePurpose, Session, User, UserUpdate};

/// Credential store backed by a `HashMap`
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialStore {
    users: Arc<Mutex<HashMap<Uuid, User>>>,
    failing_reads: Arc<AtomicU32>,
    read_delay_ms: Arc<AtomicU64>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` reads fail with `StoreError::Unavailable`
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    fn check_read(&self) -> StoreResult<()> {
        let injected = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StoreError::Unavailable("injected read failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    /// Hold the result of the next read for `delay` before returning it
    pub fn delay_next_read(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn stall(&self) {
        let millis = self.read_delay_ms.swap(0, Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.lock().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.check_read()?;
        let user = self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned();
        self.stall().await;
        Ok(user)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.check_read()?;
        let user = self.users.lock().await.get(&id).cloned();
        self.stall().await;
        Ok(user)
    }

    async fn get_by_token(
        &self,
        purpose: OneTimePurpose,
        token_hash: &str,
    ) -> StoreResult<Option<User>> {
        self.check_read()?;
        let user = self
            .users
            .lock()
            .await
            .values()
            .find(|u| matches!(u.one_time_token(purpose), Some((hash, _)) if hash == token_hash))
            .cloned();
        self.stall().await;
        Ok(user)
    }

    async fn insert(&self, new_user: NewUser) -> StoreResult<User> {
        let mut users = self.users.lock().await;
        if users.values().any(|u| u.email == new_user.email) {
            return Err(StoreError::UniqueViolation("users_email_key".to_string()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            full_name: None,
            password_hash: new_user.password_hash,
            is_active: false,
            is_email_verified: false,
            is_superuser: false,
            verification_token_hash: Some(new_user.verification_token_hash),
            verification_expires_at: Some(new_user.verification_expires_at),
            reset_token_hash: None,
            reset_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, id: Uuid, update: &UserUpdate) -> StoreResult<Option<User>> {
        let mut users = self.users.lock().await;
        match users.get_mut(&id) {
            Some(stored) if update.allows(stored) => {
                update.apply(stored);
                stored.updated_at = Utc::now();
                Ok(Some(stored.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list(&self, offset: i64, limit: i64) -> StoreResult<Vec<User>> {
        self.check_read()?;
        let mut users: Vec<User> = self.users.lock().await.values().cloned().collect();
        users.sort_by_key(|u| (u.created_at, u.id));
        Ok(users
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

/// Session store backed by a `HashMap` keyed by `jti`
#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active sessions owned by `user_id`
    pub async fn active_count(&self, user_id: Uuid) -> usize {
        let now = Utc::now();
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.user_id == user_id && s.is_active_at(now))
            .count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, new: NewSession) -> StoreResult<Session> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&new.jti) {
            return Err(StoreError::UniqueViolation("sessions_jti_key".to_string()));
        }
        let session = Session::new(new);
        sessions.insert(session.jti, session.clone());
        Ok(session)
    }

    async fn find_active(&self, jti: Uuid) -> StoreResult<Option<Session>> {
        let now = Utc::now();
        Ok(self
            .sessions
            .lock()
            .await
            .get(&jti)
            .filter(|s| s.is_active_at(now))
            .cloned())
    }

    async fn find(&self, jti: Uuid) -> StoreResult<Option<Session>> {
        Ok(self.sessions.lock().await.get(&jti).cloned())
    }

    async fn revoke(&self, jti: Uuid) -> StoreResult<bool> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&jti) {
            Some(session) if !session.revoked => {
                session.revoked = true;
                session.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all(&self, user_id: Uuid) -> StoreResult<u64> {
        let now = Utc::now();
        let mut revoked = 0;
        for session in self.sessions.lock().await.values_mut() {
            if session.user_id == user_id && !session.revoked {
                session.revoked = true;
                session.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn rotate(
        &self,
        old_jti: Uuid,
        user_id: Uuid,
        next: NewSession,
    ) -> StoreResult<Option<Session>> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;

        if sessions.contains_key(&next.jti) {
            return Err(StoreError::UniqueViolation("sessions_jti_key".to_string()));
        }
        match sessions.get_mut(&old_jti) {
            Some(old) if old.user_id == user_id && old.is_active_at(now) => {
                old.revoked = true;
                old.revoked_at = Some(now);
                old.replaced_by = Some(next.jti);
            }
            _ => return Ok(None),
        }

        let session = Session::new(next);
        sessions.insert(session.jti, session.clone());
        Ok(Some(session))
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut sessions = self.sessions.lock().await;
        let count = sessions.len();
        sessions.retain(|_, s| s.expires_at >= before);
        Ok((count - sessions.len()) as u64)
    }
}
