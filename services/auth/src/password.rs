//! Password hashing with Argon2id
//!
//! Hashing is CPU-bound and deliberately slow, so the async entry points run
//! it on the blocking thread pool instead of a runtime worker.

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier, Version,
    password_hash::SaltString,
};

use crate::config::Settings;
use crate::error::{AuthError, AuthResult};

/// Argon2 hasher with configured cost parameters
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
    /// Hash checked against when the account does not exist, so an unknown
    /// email costs as much as a wrong password
    decoy_hash: String,
}

impl PasswordHasher {
    pub fn from_settings(settings: &Settings) -> AuthResult<Self> {
        let params = Params::new(
            settings.password_memory_kib,
            settings.password_iterations,
            settings.password_parallelism,
            None,
        )
        .map_err(|e| AuthError::Configuration(format!("invalid argon2 parameters: {e}")))?;

        let mut hasher = Self {
            params,
            decoy_hash: String::new(),
        };
        hasher.decoy_hash = hasher.hash_blocking("decoy-password-never-matches")?;
        Ok(hasher)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    fn hash_blocking(&self, password: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut rand::thread_rng());
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(format!("failed to hash password: {e}")))
    }

    fn verify_blocking(&self, password: &str, hash: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AuthError::Internal(format!("failed to parse password hash: {e}")))?;
        Ok(self
            .argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// Hash a password into a PHC string
    pub async fn hash(&self, password: &str) -> AuthResult<String> {
        let hasher = self.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))?
    }

    /// Check a password against a stored hash, or against the decoy when the
    /// account is unknown. The decoy never matches.
    pub async fn verify(&self, password: &str, hash: Option<&str>) -> AuthResult<bool> {
        let hasher = self.clone();
        let password = password.to_string();
        let known = hash.is_some();
        let hash = hash.unwrap_or(self.decoy_hash.as_str()).to_string();
        let matched = tokio::task::spawn_blocking(move || hasher.verify_blocking(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))??;
        Ok(known && matched)
    }
}
