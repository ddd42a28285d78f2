//! Single-use tokens for email verification and password reset
//!
//! These live in their own token space: opaque random strings rather than
//! signed claims, so a verification link can never be replayed as an access
//! or refresh token. Only the SHA-256 digest is persisted.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;

/// A token to send to the user together with the digest to store
#[derive(Debug, Clone)]
pub struct OneTimeToken {
    pub token: String,
    pub digest: String,
}

impl OneTimeToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill(&mut bytes[..]);
        let token = URL_SAFE_NO_PAD.encode(bytes);
        let digest = digest(&token);
        Self { token, digest }
    }
}

/// Digest under which a presented token is looked up
pub fn digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique_and_url_safe() {
        let a = OneTimeToken::generate();
        let b = OneTimeToken::generate();

        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 43);
        assert!(
            a.token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_digest_matches_presented_token() {
        let issued = OneTimeToken::generate();
        assert_eq!(digest(&issued.token), issued.digest);
        assert_ne!(issued.digest, issued.token);
    }
}
