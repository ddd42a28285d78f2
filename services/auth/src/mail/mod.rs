//! Outgoing mail
//!
//! The core only decides who gets which link. Delivery is best-effort: a
//! dispatch failure is logged by the caller and never undoes the operation
//! that produced the message.

mod memory;
mod queue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{LogMailer, MemoryMailer};
pub use queue::{
    HttpMailTransport, MailJob, MailTransport, MailWorker, RedisMailQueue, RetryPolicy,
};

/// Mail dispatch and delivery failures
#[derive(Error, Debug)]
pub enum MailError {
    #[error("mail queue error: {0}")]
    Queue(String),

    #[error("mail transport error: {0}")]
    Transport(String),

    #[error("mail API rejected message with status {0}")]
    Rejected(u16),

    #[error("mail encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// What a message is for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MailKind {
    Verification,
    PasswordReset,
}

/// A message ready to be rendered and delivered
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MailMessage {
    pub kind: MailKind,
    pub to: String,
    pub link: String,
    pub expiry_text: String,
}

impl MailMessage {
    pub fn subject(&self, app_title: &str) -> String {
        match self.kind {
            MailKind::Verification => format!("{app_title}: verify your email"),
            MailKind::PasswordReset => format!("{app_title}: reset your password"),
        }
    }

    pub fn body(&self, app_title: &str) -> String {
        match self.kind {
            MailKind::Verification => format!(
                "Welcome to {app_title}!\n\n\
                 Confirm your email address by opening the link below:\n\n{}\n\n\
                 The link expires in {}. If you did not create an account, ignore this email.\n",
                self.link, self.expiry_text
            ),
            MailKind::PasswordReset => format!(
                "A password reset was requested for your {app_title} account.\n\n\
                 Choose a new password here:\n\n{}\n\n\
                 The link expires in {}. If you did not ask for a reset, ignore this email.\n",
                self.link, self.expiry_text
            ),
        }
    }

    /// The `token` query parameter carried by the link
    pub fn token(&self) -> Option<&str> {
        let (_, query) = self.link.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
    }
}

/// Delivers verification and password-reset mail
#[async_trait]
pub trait MailDispatcher: Send + Sync {
    async fn dispatch(&self, message: MailMessage) -> Result<(), MailError>;

    async fn send_verification(
        &self,
        to: &str,
        link: &str,
        expiry_text: &str,
    ) -> Result<(), MailError> {
        self.dispatch(MailMessage {
            kind: MailKind::Verification,
            to: to.to_string(),
            link: link.to_string(),
            expiry_text: expiry_text.to_string(),
        })
        .await
    }

    async fn send_password_reset(
        &self,
        to: &str,
        link: &str,
        expiry_text: &str,
    ) -> Result<(), MailError> {
        self.dispatch(MailMessage {
            kind: MailKind::PasswordReset,
            to: to.to_string(),
            link: link.to_string(),
            expiry_text: expiry_text.to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(kind: MailKind) -> MailMessage {
        MailMessage {
            kind,
            to: "alice@example.com".to_string(),
            link: "http://localhost:3000/auth/verify?token=abc_DEF-123".to_string(),
            expiry_text: "24 hours".to_string(),
        }
    }

    #[test]
    fn test_token_is_read_from_link() {
        assert_eq!(message(MailKind::Verification).token(), Some("abc_DEF-123"));

        let no_query = MailMessage {
            link: "http://localhost:3000/auth/verify".to_string(),
            ..message(MailKind::Verification)
        };
        assert_eq!(no_query.token(), None);
    }

    #[test]
    fn test_rendering_mentions_link_and_expiry() {
        let verification = message(MailKind::Verification);
        let body = verification.body("Acme");
        assert!(body.contains(&verification.link));
        assert!(body.contains("24 hours"));
        assert_eq!(verification.subject("Acme"), "Acme: verify your email");

        let reset = message(MailKind::PasswordReset);
        assert_eq!(reset.subject("Acme"), "Acme: reset your password");
        assert!(reset.body("Acme").contains("password reset"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_value(message(MailKind::PasswordReset)).unwrap();
        assert_eq!(json["kind"], "password_reset");
    }
}
