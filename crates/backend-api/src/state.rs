use retrack_auth::{AuthSession, Authenticator, User};
use retrack_config::MonitoringConfig;
use sqlx::SqlitePool;

use crate::services::dedupe::DedupeCache;
use crate::ApiError;

#[derive(Clone)]
pub struct AppState {
    pool: SqlitePool,
    authenticator: Authenticator,
    dedupe: DedupeCache,
    monitoring: MonitoringConfig,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        authenticator: Authenticator,
        dedupe: DedupeCache,
        monitoring: MonitoringConfig,
    ) -> Self {
        Self {
            pool,
            authenticator,
            dedupe,
            monitoring,
        }
    }

    /// State backed by the database dedupe store and default monitoring settings.
    pub fn with_defaults(pool: SqlitePool, authenticator: Authenticator) -> Self {
        let dedupe = DedupeCache::database(pool.clone(), "retrack:");
        Self::new(pool, authenticator, dedupe, MonitoringConfig::default())
    }

    pub fn db_pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn dedupe(&self) -> &DedupeCache {
        &self.dedupe
    }

    pub fn monitoring(&self) -> &MonitoringConfig {
        &self.monitoring
    }

    pub async fn authenticate(&self, token: &str) -> Result<(User, AuthSession), ApiError> {
        self.authenticator
            .authenticate_token(token)
            .await
            .map_err(ApiError::from)
    }
}
