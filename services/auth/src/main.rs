use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::migrate::Migrator;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use auth::{
    AppState,
    config::Settings,
    mail::{
        HttpMailTransport, LogMailer, MailDispatcher, MailWorker, RedisMailQueue, RetryPolicy,
    },
    rate_limiter::{RateLimiter, RateLimiterConfig},
    repositories::{SessionRepository, UserRepository},
    routes,
    service::AuthService,
};
use common::{cache, database};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting authentication service");

    // Refuse to serve traffic with missing or weak signing settings
    let settings = Arc::new(Settings::from_env()?);

    // Initialize database connection pool
    let db_config = database::DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;

    // Check database connectivity
    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    if settings.run_migrations {
        database::run_migrations(&pool, &MIGRATOR).await?;
    }

    let store_timeout = Duration::from_millis(settings.store_timeout_ms);
    let users = Arc::new(UserRepository::new(pool.clone(), store_timeout));
    let sessions = Arc::new(SessionRepository::new(pool, store_timeout));

    let mailer: Arc<dyn MailDispatcher> = if settings.mail_queue_enabled {
        let redis_config = cache::RedisConfig::from_env()?;
        let redis_pool = cache::RedisPool::new(&redis_config).await?;
        if !redis_pool.health_check().await? {
            anyhow::bail!("Failed to connect to Redis");
        }

        let queue = RedisMailQueue::new(redis_pool);
        let transport = Arc::new(HttpMailTransport::from_settings(&settings)?);
        let worker = MailWorker::new(
            queue.clone(),
            transport,
            RetryPolicy::from_settings(&settings),
        );
        tokio::spawn(worker.run());
        Arc::new(queue)
    } else {
        info!("Mail queue disabled, outgoing mail is only logged");
        Arc::new(LogMailer)
    };

    let auth = Arc::new(AuthService::new(settings.clone(), users, sessions, mailer)?);
    let rate_limiter = RateLimiter::new(RateLimiterConfig::from_settings(&settings));

    spawn_maintenance(auth.clone(), rate_limiter.clone());

    let app_state = AppState { auth, rate_limiter };

    info!("Authentication service initialized successfully");

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(&settings.bind_address).await?;
    info!("Authentication service listening on {}", settings.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically purge expired sessions and idle rate-limit entries
fn spawn_maintenance(auth: Arc<AuthService>, rate_limiter: RateLimiter) {
    let period = Duration::from_secs(auth.settings().session_purge_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = auth.purge_expired_sessions().await {
                error!("Failed to purge expired sessions: {}", e);
            }
            rate_limiter.prune().await;
        }
    });
}
