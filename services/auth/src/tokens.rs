//! Token service for signed access and refresh tokens
//!
//! Both kinds share one signing key and carry the same claim set; the `kind`
//! claim keeps them apart. Access tokens are never persisted, so their
//! validity is signature plus expiry only. Refresh tokens are additionally
//! backed by a session row keyed by their `jti`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::{MIN_SECRET_LEN, Settings};
use crate::error::{AuthError, AuthResult};

/// Token type discriminator
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived API credential
    Access,
    /// Long-lived credential exchanged for a new pair
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User ID
    pub sub: Uuid,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Expiration, seconds since the epoch
    pub exp: i64,
    /// Unique token identifier
    pub jti: Uuid,
    pub kind: TokenKind,
}

/// A freshly signed token and the metadata needed to persist it
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Creates and verifies signed tokens
#[derive(Clone)]
pub struct TokenService {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &self.algorithm)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

/// Inline PEM, or a path to a PEM file
fn load_pem(value: &str, name: &str) -> AuthResult<String> {
    if value.trim_start().starts_with("-----BEGIN") {
        return Ok(value.to_string());
    }
    std::fs::read_to_string(value)
        .map(|pem| pem.trim().to_string())
        .map_err(|e| AuthError::Configuration(format!("failed to read {name} file: {e}")))
}

fn required<'a>(value: &'a Option<String>, name: &str) -> AuthResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AuthError::Configuration(format!("{name} is not set")))
}

impl TokenService {
    /// Build the signing keys described by the settings
    ///
    /// Fails with `ConfigurationError` for an unknown algorithm, a missing key,
    /// an HMAC secret shorter than [`MIN_SECRET_LEN`] bytes, or an unparsable PEM.
    pub fn from_settings(settings: &Settings) -> AuthResult<Self> {
        let algorithm = Algorithm::from_str(&settings.jwt_algorithm).map_err(|_| {
            AuthError::Configuration(format!(
                "unsupported JWT algorithm {}",
                settings.jwt_algorithm
            ))
        })?;

        let key_error =
            |e: jsonwebtoken::errors::Error| AuthError::Configuration(format!("invalid key: {e}"));

        let (encoding_key, decoding_key) = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = required(&settings.jwt_secret, "AUTH_JWT_SECRET")?;
                if secret.len() < MIN_SECRET_LEN {
                    return Err(AuthError::Configuration(format!(
                        "AUTH_JWT_SECRET must be at least {MIN_SECRET_LEN} bytes"
                    )));
                }
                (
                    EncodingKey::from_secret(secret.as_bytes()),
                    DecodingKey::from_secret(secret.as_bytes()),
                )
            }
            _ => {
                let private_pem = load_pem(
                    required(&settings.jwt_private_key, "AUTH_JWT_PRIVATE_KEY")?,
                    "private key",
                )?;
                let public_pem = load_pem(
                    required(&settings.jwt_public_key, "AUTH_JWT_PUBLIC_KEY")?,
                    "public key",
                )?;
                match algorithm {
                    Algorithm::ES256 | Algorithm::ES384 => (
                        EncodingKey::from_ec_pem(private_pem.as_bytes()).map_err(key_error)?,
                        DecodingKey::from_ec_pem(public_pem.as_bytes()).map_err(key_error)?,
                    ),
                    Algorithm::EdDSA => (
                        EncodingKey::from_ed_pem(private_pem.as_bytes()).map_err(key_error)?,
                        DecodingKey::from_ed_pem(public_pem.as_bytes()).map_err(key_error)?,
                    ),
                    _ => (
                        EncodingKey::from_rsa_pem(private_pem.as_bytes()).map_err(key_error)?,
                        DecodingKey::from_rsa_pem(public_pem.as_bytes()).map_err(key_error)?,
                    ),
                }
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            algorithm,
            encoding_key,
            decoding_key,
            validation,
            access_ttl: Duration::seconds(settings.access_token_ttl_secs as i64),
            refresh_ttl: Duration::seconds(settings.refresh_token_ttl_secs as i64),
        })
    }

    /// Sign a new token of `kind` for `user_id` with a random `jti`
    pub fn issue(&self, user_id: Uuid, kind: TokenKind) -> AuthResult<IssuedToken> {
        self.issue_at(user_id, kind, Utc::now())
    }

    pub(crate) fn issue_at(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> AuthResult<IssuedToken> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let iat = now.timestamp();
        let exp = iat + ttl.num_seconds();

        let claims = Claims {
            sub: user_id,
            iat,
            exp,
            jti: Uuid::new_v4(),
            kind,
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("failed to sign token: {e}")))?;

        let issued_at = DateTime::from_timestamp(iat, 0)
            .ok_or_else(|| AuthError::Internal("issued-at out of range".to_string()))?;
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| AuthError::Internal("expiry out of range".to_string()))?;

        Ok(IssuedToken {
            token,
            jti: claims.jti,
            issued_at,
            expires_at,
        })
    }

    /// Verify signature, structure, expiry and kind
    pub fn verify(&self, token: &str, expected: TokenKind) -> AuthResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => debug!("Rejected expired {} token", expected.as_str()),
                other => debug!("Rejected {} token: {:?}", expected.as_str(), other),
            }
            AuthError::InvalidToken
        })?;

        if data.claims.kind != expected {
            debug!(
                "Rejected {} token presented as {}",
                data.claims.kind.as_str(),
                expected.as_str()
            );
            return Err(AuthError::WrongKind);
        }

        Ok(data.claims)
    }

    /// Access token lifetime in seconds
    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl.num_seconds() as u64
    }
}
