use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::{MailDispatcher, MailError, MailMessage};

/// Development dispatcher that only records the send in the log
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl MailDispatcher for LogMailer {
    async fn dispatch(&self, message: MailMessage) -> Result<(), MailError> {
        // The link carries a live token, so it stays out of the log.
        info!(
            "Mail delivery disabled, dropping {:?} message to {}",
            message.kind, message.to
        );
        Ok(())
    }
}

/// Dispatcher that keeps every message in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryMailer {
    sent: Arc<Mutex<Vec<MailMessage>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make dispatch fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().await.clone()
    }

    /// Most recent message addressed to `to`
    pub async fn last_to(&self, to: &str) -> Option<MailMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|m| m.to == to)
            .cloned()
    }
}

#[async_trait]
impl MailDispatcher for MemoryMailer {
    async fn dispatch(&self, message: MailMessage) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Transport("mailer is failing".to_string()));
        }
        self.sent.lock().await.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MailKind;

    #[tokio::test]
    async fn test_memory_mailer_records_and_fails_on_demand() {
        let mailer = MemoryMailer::new();
        mailer
            .send_verification("a@example.com", "http://x/verify?token=one", "24 hours")
            .await
            .unwrap();
        mailer
            .send_password_reset("a@example.com", "http://x/reset?token=two", "1 hour")
            .await
            .unwrap();

        let last = mailer.last_to("a@example.com").await.unwrap();
        assert_eq!(last.kind, MailKind::PasswordReset);
        assert_eq!(last.token(), Some("two"));
        assert_eq!(mailer.sent().await.len(), 2);

        mailer.set_failing(true);
        assert!(
            mailer
                .send_verification("b@example.com", "http://x", "1 hour")
                .await
                .is_err()
        );
        assert!(mailer.last_to("b@example.com").await.is_none());
    }
}
