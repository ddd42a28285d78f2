//! Redis-backed mail outbox and its delivery worker
//!
//! `RedisMailQueue` is the dispatcher handed to the auth service: it only
//! serializes a [`MailJob`] onto a Redis list. `MailWorker` drains that list
//! in the background, renders each message and posts it to the mail API,
//! pushing failed jobs back with a delay until the attempt budget runs out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::cache::RedisPool;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use super::{MailDispatcher, MailError, MailMessage};
use crate::config::Settings;
use crate::error::{AuthError, AuthResult};

/// Redis list holding pending mail
pub const OUTBOX_LIST: &str = "auth:mail:outbox";

const IDLE_POLL: Duration = Duration::from_secs(1);

/// Queue envelope around a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MailJob {
    pub message: MailMessage,
    /// Failed deliveries so far
    pub attempts: u32,
    pub not_before: DateTime<Utc>,
}

impl MailJob {
    pub fn new(message: MailMessage) -> Self {
        Self {
            message,
            attempts: 0,
            not_before: Utc::now(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now
    }
}

/// Redis outbox used as the service's mail dispatcher
#[derive(Clone)]
pub struct RedisMailQueue {
    redis: RedisPool,
    list: String,
}

impl RedisMailQueue {
    pub fn new(redis: RedisPool) -> Self {
        Self {
            redis,
            list: OUTBOX_LIST.to_string(),
        }
    }

    pub async fn enqueue(&self, job: &MailJob) -> Result<u64, MailError> {
        let payload = serde_json::to_string(job)?;
        self.redis
            .push(&self.list, &payload)
            .await
            .map_err(|e| MailError::Queue(e.to_string()))
    }

    pub async fn pop(&self) -> Result<Option<MailJob>, MailError> {
        let payload = self
            .redis
            .pop(&self.list)
            .await
            .map_err(|e| MailError::Queue(e.to_string()))?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MailDispatcher for RedisMailQueue {
    async fn dispatch(&self, message: MailMessage) -> Result<(), MailError> {
        let kind = message.kind;
        let depth = self.enqueue(&MailJob::new(message)).await?;
        info!("Queued {:?} mail, outbox depth {}", kind, depth);
        Ok(())
    }
}

/// Final delivery of a rendered message
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Posts messages as JSON to an HTTP mail API
#[derive(Clone)]
pub struct HttpMailTransport {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    app_title: String,
}

impl HttpMailTransport {
    pub fn from_settings(settings: &Settings) -> AuthResult<Self> {
        let url = settings
            .mail_api_url
            .clone()
            .ok_or_else(|| AuthError::Configuration("AUTH_MAIL_API_URL is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Configuration(format!("failed to build mail client: {e}")))?;

        Ok(Self {
            client,
            url,
            api_key: settings.mail_api_key.clone(),
            app_title: settings.app_title.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn deliver(&self, message: &MailMessage) -> Result<(), MailError> {
        let mut request = self.client.post(&self.url).json(&json!({
            "to": message.to,
            "subject": message.subject(&self.app_title),
            "text": message.body(&self.app_title),
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MailError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

/// How often and how far apart failed deliveries are retried
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: chrono::Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.mail_max_attempts.max(1),
            delay: chrono::Duration::seconds(settings.mail_retry_delay_secs as i64),
        }
    }

    /// Deliver `job` once; returns the job to requeue if another attempt is allowed
    pub async fn attempt(&self, transport: &dyn MailTransport, job: MailJob) -> Option<MailJob> {
        match transport.deliver(&job.message).await {
            Ok(()) => {
                info!("Delivered {:?} mail to {}", job.message.kind, job.message.to);
                None
            }
            Err(e) => {
                let attempts = job.attempts + 1;
                if attempts >= self.max_attempts {
                    error!(
                        "Giving up on {:?} mail to {} after {} attempts: {}",
                        job.message.kind, job.message.to, attempts, e
                    );
                    return None;
                }
                warn!(
                    "Mail delivery failed (attempt {}/{}), retrying in {}s: {}",
                    attempts,
                    self.max_attempts,
                    self.delay.num_seconds(),
                    e
                );
                Some(MailJob {
                    attempts,
                    not_before: Utc::now() + self.delay,
                    ..job
                })
            }
        }
    }
}

/// Background consumer of the mail outbox
pub struct MailWorker {
    queue: RedisMailQueue,
    transport: Arc<dyn MailTransport>,
    policy: RetryPolicy,
}

impl MailWorker {
    pub fn new(queue: RedisMailQueue, transport: Arc<dyn MailTransport>, policy: RetryPolicy) -> Self {
        Self {
            queue,
            transport,
            policy,
        }
    }

    /// Handle at most one job; `Ok(false)` means nothing was ready
    pub async fn run_once(&self) -> Result<bool, MailError> {
        let Some(job) = self.queue.pop().await? else {
            return Ok(false);
        };

        if !job.is_due(Utc::now()) {
            self.queue.enqueue(&job).await?;
            return Ok(false);
        }

        if let Some(retry) = self.policy.attempt(self.transport.as_ref(), job).await {
            self.queue.enqueue(&retry).await?;
        }
        Ok(true)
    }

    pub async fn run(self) {
        info!("Mail worker started");
        loop {
            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!("Mail worker error: {}", e),
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MailKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` deliveries
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MailTransport for FlakyTransport {
        async fn deliver(&self, _message: &MailMessage) -> Result<(), MailError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(MailError::Rejected(503))
            } else {
                Ok(())
            }
        }
    }

    fn job() -> MailJob {
        MailJob::new(MailMessage {
            kind: MailKind::Verification,
            to: "alice@example.com".to_string(),
            link: "http://localhost:3000/auth/verify?token=t".to_string(),
            expiry_text: "24 hours".to_string(),
        })
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::from_settings(&Settings::default())
    }

    #[tokio::test]
    async fn test_failed_delivery_is_delayed_for_retry() {
        let transport = FlakyTransport {
            failures: 1,
            calls: AtomicU32::new(0),
        };
        let before = Utc::now();

        let retry = policy().attempt(&transport, job()).await.unwrap();
        assert_eq!(retry.attempts, 1);
        assert!(retry.not_before >= before + chrono::Duration::seconds(60));
        assert!(!retry.is_due(Utc::now()));

        assert!(policy().attempt(&transport, retry).await.is_none());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delivery_gives_up_after_max_attempts() {
        let transport = FlakyTransport {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let policy = policy();

        let mut next = Some(job());
        let mut rounds = 0;
        while let Some(job) = next {
            next = policy.attempt(&transport, job).await;
            rounds += 1;
        }
        assert_eq!(rounds, policy.max_attempts);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_job_envelope_survives_json() {
        let job = job();
        let decoded: MailJob = serde_json::from_str(&serde_json::to_string(&job).unwrap()).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_http_transport_requires_endpoint() {
        assert!(matches!(
            HttpMailTransport::from_settings(&Settings::default()),
            Err(AuthError::Configuration(_))
        ));
    }
}
