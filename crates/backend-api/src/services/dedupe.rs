//! Once-per-day markers for the notification batches.
//!
//! Keys live in Redis when a connection is available and in the
//! `cache_entries` table otherwise.

use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use retrack_database::CacheRepository;
use sqlx::SqlitePool;
use tracing::warn;

use super::error::ServiceError;

#[derive(Clone)]
pub struct DedupeCache {
    prefix: String,
    store: DedupeStore,
}

#[derive(Clone)]
enum DedupeStore {
    Redis(ConnectionManager),
    Database(CacheRepository),
}

impl DedupeCache {
    pub fn database(pool: SqlitePool, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            store: DedupeStore::Database(CacheRepository::new(pool)),
        }
    }

    pub fn redis(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            store: DedupeStore::Redis(conn),
        }
    }

    /// Redis when a connection is given, the database table otherwise.
    pub fn new(pool: SqlitePool, redis: Option<ConnectionManager>, prefix: impl Into<String>) -> Self {
        match redis {
            Some(conn) => Self::redis(conn, prefix),
            None => Self::database(pool, prefix),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self.store {
            DedupeStore::Redis(_) => "redis",
            DedupeStore::Database(_) => "database",
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Atomically mark `key` until `expires_at`, returning false when a
    /// live marker already exists at `now`.
    pub async fn claim(&self, key: &str, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<bool, ServiceError> {
        let key = self.key(key);
        match &self.store {
            DedupeStore::Redis(conn) => {
                let mut conn = conn.clone();
                let ttl = (expires_at - now).num_seconds().max(1);
                let reply: Option<String> = redis::cmd("SET")
                    .arg(&key)
                    .arg(1)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| ServiceError::internal(format!("redis SET NX failed: {e}")))?;
                Ok(reply.is_some())
            }
            DedupeStore::Database(repo) => Ok(repo.claim(&key, now.timestamp(), expires_at.timestamp()).await?),
        }
    }

    /// Drop expired database markers. Redis expires its own keys.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> u64 {
        match &self.store {
            DedupeStore::Redis(_) => 0,
            DedupeStore::Database(repo) => match repo.purge_expired(now.timestamp()).await {
                Ok(removed) => removed,
                Err(err) => {
                    warn!(error = %err, "failed to purge dedupe markers");
                    0
                }
            },
        }
    }
}

/// First instant of the next UTC day.
pub fn end_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now + Duration::days(1))
}
