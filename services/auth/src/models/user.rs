//! User model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User entity
///
/// One-time tokens are never stored in plain text, only their digests.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub is_superuser: bool,
    #[serde(skip_serializing)]
    pub verification_token_hash: Option<String>,
    #[serde(skip_serializing)]
    pub verification_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub reset_token_hash: Option<String>,
    #[serde(skip_serializing)]
    pub reset_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Outstanding one-time token digest and expiry for the given purpose
    pub fn one_time_token(&self, purpose: OneTimePurpose) -> Option<(&str, Option<DateTime<Utc>>)> {
        match purpose {
            OneTimePurpose::Verification => self
                .verification_token_hash
                .as_deref()
                .map(|h| (h, self.verification_expires_at)),
            OneTimePurpose::PasswordReset => self
                .reset_token_hash
                .as_deref()
                .map(|h| (h, self.reset_expires_at)),
        }
    }

    /// Replace or clear the one-time token for the given purpose
    pub fn set_one_time_token(
        &mut self,
        purpose: OneTimePurpose,
        token: Option<(String, DateTime<Utc>)>,
    ) {
        let (hash, expires_at) = match token {
            Some((hash, expires_at)) => (Some(hash), Some(expires_at)),
            None => (None, None),
        };
        match purpose {
            OneTimePurpose::Verification => {
                self.verification_token_hash = hash;
                self.verification_expires_at = expires_at;
            }
            OneTimePurpose::PasswordReset => {
                self.reset_token_hash = hash;
                self.reset_expires_at = expires_at;
            }
        }
    }
}

/// New user creation payload
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub verification_token_hash: String,
    pub verification_expires_at: DateTime<Utc>,
}

/// What a one-time token authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneTimePurpose {
    Verification,
    PasswordReset,
}

impl OneTimePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OneTimePurpose::Verification => "verification",
            OneTimePurpose::PasswordReset => "password_reset",
        }
    }
}

/// A targeted write to one user row
///
/// Only the fields that were set are written, and nothing is written unless
/// every guard still holds on the stored row. Concurrent updates touching
/// different fields therefore never undo each other.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub password_hash: Option<String>,
    pub full_name: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub is_email_verified: Option<bool>,
    pub is_superuser: Option<bool>,
    pub verification_token: Option<Option<(String, DateTime<Utc>)>>,
    pub reset_token: Option<Option<(String, DateTime<Utc>)>>,

    /// Guard: stored `is_active` must equal this
    pub when_active: Option<bool>,
    /// Guard: stored `is_email_verified` must equal this
    pub when_verified: Option<bool>,
    /// Guard: this digest must still be the outstanding token for the purpose
    pub consuming: Option<(OneTimePurpose, String)>,
}

impl UserUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn password(mut self, hash: String) -> Self {
        self.password_hash = Some(hash);
        self
    }

    pub fn full_name(mut self, full_name: Option<String>) -> Self {
        self.full_name = Some(full_name);
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.is_active = Some(active);
        self
    }

    pub fn email_verified(mut self, verified: bool) -> Self {
        self.is_email_verified = Some(verified);
        self
    }

    pub fn superuser(mut self, superuser: bool) -> Self {
        self.is_superuser = Some(superuser);
        self
    }

    /// Replace or clear the one-time token for `purpose`
    pub fn one_time_token(
        mut self,
        purpose: OneTimePurpose,
        token: Option<(String, DateTime<Utc>)>,
    ) -> Self {
        match purpose {
            OneTimePurpose::Verification => self.verification_token = Some(token),
            OneTimePurpose::PasswordReset => self.reset_token = Some(token),
        }
        self
    }

    pub fn when_active(mut self, active: bool) -> Self {
        self.when_active = Some(active);
        self
    }

    pub fn when_verified(mut self, verified: bool) -> Self {
        self.when_verified = Some(verified);
        self
    }

    /// Only write while `digest` is the outstanding `purpose` token
    pub fn consuming(mut self, purpose: OneTimePurpose, digest: impl Into<String>) -> Self {
        self.consuming = Some((purpose, digest.into()));
        self
    }

    /// Whether the guards hold for `user`
    pub fn allows(&self, user: &User) -> bool {
        self.when_active.is_none_or(|active| user.is_active == active)
            && self
                .when_verified
                .is_none_or(|verified| user.is_email_verified == verified)
            && self.consuming.as_ref().is_none_or(|(purpose, digest)| {
                matches!(user.one_time_token(*purpose), Some((hash, _)) if hash == digest)
            })
    }

    /// Write the set fields into `user`
    pub fn apply(&self, user: &mut User) {
        if let Some(hash) = &self.password_hash {
            user.password_hash = hash.clone();
        }
        if let Some(full_name) = &self.full_name {
            user.full_name = full_name.clone();
        }
        if let Some(active) = self.is_active {
            user.is_active = active;
        }
        if let Some(verified) = self.is_email_verified {
            user.is_email_verified = verified;
        }
        if let Some(superuser) = self.is_superuser {
            user.is_superuser = superuser;
        }
        if let Some(token) = &self.verification_token {
            user.set_one_time_token(OneTimePurpose::Verification, token.clone());
        }
        if let Some(token) = &self.reset_token {
            user.set_one_time_token(OneTimePurpose::PasswordReset, token.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            full_name: None,
            password_hash: "hash".to_string(),
            is_active: false,
            is_email_verified: false,
            is_superuser: false,
            verification_token_hash: None,
            verification_expires_at: None,
            reset_token_hash: None,
            reset_expires_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_one_time_token_slots_are_independent() {
        let mut user = user();
        let expires = Utc::now();
        user.set_one_time_token(OneTimePurpose::Verification, Some(("v".into(), expires)));

        assert_eq!(
            user.one_time_token(OneTimePurpose::Verification),
            Some(("v", Some(expires)))
        );
        assert!(user.one_time_token(OneTimePurpose::PasswordReset).is_none());

        user.set_one_time_token(OneTimePurpose::Verification, None);
        assert!(user.one_time_token(OneTimePurpose::Verification).is_none());
        assert!(user.verification_expires_at.is_none());
    }

    #[test]
    fn test_serialization_hides_secrets() {
        let mut user = user();
        user.set_one_time_token(
            OneTimePurpose::PasswordReset,
            Some(("secret".into(), Utc::now())),
        );
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("reset_token_hash").is_none());
        assert_eq!(json["email"], "alice@example.com");
        assert_eq!(json["is_superuser"], false);
    }

    #[test]
    fn test_update_touches_only_set_fields() {
        let mut user = user();
        user.is_active = true;
        UserUpdate::new().password("new-hash".into()).apply(&mut user);

        assert_eq!(user.password_hash, "new-hash");
        assert!(user.is_active);
        assert_eq!(user.email, "alice@example.com");
    }

    #[test]
    fn test_update_guards() {
        let mut user = user();
        user.set_one_time_token(OneTimePurpose::Verification, Some(("v".into(), Utc::now())));

        assert!(!UserUpdate::new().when_active(true).allows(&user));
        assert!(UserUpdate::new().when_verified(false).allows(&user));
        assert!(
            UserUpdate::new()
                .consuming(OneTimePurpose::Verification, "v")
                .allows(&user)
        );
        assert!(
            !UserUpdate::new()
                .consuming(OneTimePurpose::PasswordReset, "v")
                .allows(&user)
        );
    }
}
