use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use retrack_auth::Authenticator;
use retrack_backend_api::{AppState, DedupeCache};
use retrack_config::AppConfig;
use retrack_database::initialize_database;
use sqlx::SqlitePool;
use tracing::{info, warn};

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::TRACE)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub authenticator: Authenticator,
    pub redis_conn: Option<ConnectionManager>,
    pub dedupe: DedupeCache,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database)
            .await
            .context("failed to initialise database")?;

        let authenticator = Authenticator::new(db_pool.clone(), config.auth.clone());

        let redis_conn = match config.cache.redis_url.as_deref() {
            Some(url) => connect_redis(url).await,
            None => None,
        };

        let dedupe = DedupeCache::new(db_pool.clone(), redis_conn.clone(), config.cache.key_prefix.clone());
        info!(backend = dedupe.backend(), "dedupe cache ready");

        Ok(Self {
            db_pool,
            authenticator,
            redis_conn,
            dedupe,
        })
    }

    pub fn app_state(&self, config: &AppConfig) -> AppState {
        AppState::new(
            self.db_pool.clone(),
            self.authenticator.clone(),
            self.dedupe.clone(),
            config.monitoring.clone(),
        )
    }
}

/// Redis is optional; failures are logged and the database store is used instead.
async fn connect_redis(url: &str) -> Option<ConnectionManager> {
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(e) => {
            warn!("failed to create redis client, proceeding without redis: {}", e);
            return None;
        }
    };

    match ConnectionManager::new(client).await {
        Ok(conn) => {
            info!("redis connection established");
            Some(conn)
        }
        Err(e) => {
            warn!("failed to connect to redis, proceeding without redis: {}", e);
            None
        }
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
