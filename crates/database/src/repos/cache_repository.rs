//! Key/expiry store backing the daily dedupe of notification batches
//! when no Redis connection is configured.

use sqlx::SqlitePool;

use crate::types::DatabaseResult;

#[derive(Clone)]
pub struct CacheRepository {
    pool: SqlitePool,
}

impl CacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store `key` only when absent or expired. Returns true when this call claimed it.
    pub async fn claim(&self, key: &str, now: i64, expires_at: i64) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "INSERT INTO cache_entries (key, expires_at) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at
             WHERE cache_entries.expires_at <= ?",
        )
        .bind(key)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn purge_expired(&self, now: i64) -> DatabaseResult<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::migrated_pool;

    #[tokio::test]
    async fn entries_expire() {
        let (pool, _dir) = migrated_pool().await;
        let cache = CacheRepository::new(pool);

        assert!(cache.claim("k", 100, 200).await.unwrap());
        assert!(cache.claim("other", 100, 300).await.unwrap());

        assert_eq!(cache.purge_expired(250).await.unwrap(), 1);
        assert!(cache.claim("k", 250, 400).await.unwrap());
        assert!(!cache.claim("other", 250, 400).await.unwrap());
    }

    #[tokio::test]
    async fn claim_only_succeeds_once_per_window() {
        let (pool, _dir) = migrated_pool().await;
        let cache = CacheRepository::new(pool);

        assert!(cache.claim("batch", 10, 100).await.unwrap());
        assert!(!cache.claim("batch", 50, 100).await.unwrap());
        assert!(cache.claim("batch", 100, 200).await.unwrap());
    }
}
