//! Notification repository for database operations.

use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::clock::now_timestamp;
use crate::entities::Notification;
use crate::types::{DatabaseError, DatabaseResult};

const SELECT_COLUMNS: &str = "SELECT id, user_id, type, data, read_at, created_at, updated_at FROM notifications";

/// Repository for the per-user notification store
#[derive(Clone)]
pub struct NotificationRepository {
    pool: SqlitePool,
}

impl NotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, user_id: i64, notification_type: &str, data: &Value) -> DatabaseResult<Notification> {
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        let encoded = serde_json::to_string(data)?;

        sqlx::query(
            "INSERT INTO notifications (id, user_id, type, data, read_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(notification_type)
        .bind(encoded)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("notification {id}")))
    }

    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<Notification>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Notification::from_row).transpose()?)
    }

    /// Newest notifications first. Rows created in the same second keep insertion order reversed.
    pub async fn latest_for_user(&self, user_id: i64, limit: i64) -> DatabaseResult<Vec<Notification>> {
        self.page_for_user(user_id, limit, 0).await
    }

    pub async fn page_for_user(&self, user_id: i64, limit: i64, offset: i64) -> DatabaseResult<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let notifications = rows
            .iter()
            .map(Notification::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    /// Mark a notification read for its owner. Returns false when it does not belong to the user.
    pub async fn mark_read(&self, id: &str, user_id: i64) -> DatabaseResult<bool> {
        let owned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        if owned == 0 {
            return Ok(false);
        }

        let now = now_timestamp();
        sqlx::query("UPDATE notifications SET read_at = ?, updated_at = ? WHERE id = ? AND read_at IS NULL")
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(true)
    }

    pub async fn count_for_user(&self, user_id: i64) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
