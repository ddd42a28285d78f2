#![allow(dead_code)]

use std::sync::Arc;

use auth::{
    config::Settings,
    mail::MemoryMailer,
    models::{OneTimePurpose, UserUpdate},
    repositories::{CredentialStore, MemoryCredentialStore, MemorySessionStore},
    service::AuthService,
};

pub const PASSWORD: &str = "Secret123!";

pub struct TestContext {
    pub auth: Arc<AuthService>,
    pub users: MemoryCredentialStore,
    pub sessions: MemorySessionStore,
    pub mailer: MemoryMailer,
}

/// Cheap hashing and a fixed HMAC secret
pub fn test_settings() -> Settings {
    Settings {
        jwt_secret: Some("integration-test-secret-0123456789abcdef".to_string()),
        password_memory_kib: 8,
        password_iterations: 1,
        password_parallelism: 1,
        ..Settings::default()
    }
}

pub fn context() -> TestContext {
    context_with(test_settings())
}

pub fn context_with(settings: Settings) -> TestContext {
    let users = MemoryCredentialStore::new();
    let sessions = MemorySessionStore::new();
    let mailer = MemoryMailer::new();

    let auth = AuthService::new(
        Arc::new(settings),
        Arc::new(users.clone()),
        Arc::new(sessions.clone()),
        Arc::new(mailer.clone()),
    )
    .unwrap();

    TestContext {
        auth: Arc::new(auth),
        users,
        sessions,
        mailer,
    }
}

impl TestContext {
    /// Token from the most recent mail sent to `email`
    pub async fn mailed_token(&self, email: &str) -> String {
        self.mailer
            .last_to(&email.trim().to_lowercase())
            .await
            .and_then(|m| m.token().map(str::to_string))
            .unwrap()
    }

    /// Register and verify `email` with [`PASSWORD`]
    pub async fn active_user(&self, email: &str) -> uuid::Uuid {
        let registration = self.auth.register(email, PASSWORD).await.unwrap();
        let token = self.mailed_token(email).await;
        self.auth.verify_email(&token).await.unwrap();
        registration.user().id
    }

    /// Move the outstanding one-time token expiries of `email` into the past
    pub async fn expire_one_time_tokens(&self, email: &str) {
        let user = self
            .users
            .get_by_email(&email.trim().to_lowercase())
            .await
            .unwrap()
            .unwrap();
        let past = chrono::Utc::now() - chrono::Duration::minutes(1);

        let mut update = UserUpdate::new();
        for purpose in [OneTimePurpose::Verification, OneTimePurpose::PasswordReset] {
            if let Some((hash, _)) = user.one_time_token(purpose) {
                update = update.one_time_token(purpose, Some((hash.to_string(), past)));
            }
        }
        self.users.update(user.id, &update).await.unwrap();
    }
}
