//! Session model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Server-side record of one issued refresh token
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    /// `jti` claim of the refresh token this record backs
    pub jti: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    /// `jti` of the session that replaced this one on rotation
    pub replaced_by: Option<Uuid>,
}

impl Session {
    /// Build a fresh, unrevoked record
    pub fn new(new: NewSession) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            jti: new.jti,
            issued_at: new.issued_at,
            expires_at: new.expires_at,
            revoked: false,
            revoked_at: None,
            replaced_by: None,
        }
    }

    /// Usable for refresh: not revoked and not past expiry
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }

    /// Revoked because it was rotated out, as opposed to logged out
    pub fn was_rotated(&self) -> bool {
        self.revoked && self.replaced_by.is_some()
    }
}

/// New session creation payload
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub jti: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Access/refresh pair handed back to the client
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub refresh_expires_at: DateTime<Utc>,
}
