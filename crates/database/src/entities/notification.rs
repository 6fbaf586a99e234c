//! Notification entity definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// A stored notification. `data` carries the rendered payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: i64,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub data: Value,
    pub read_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Notification {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let raw_data: String = row.try_get("data")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            notification_type: row.try_get("type")?,
            data: serde_json::from_str(&raw_data).unwrap_or(Value::Null),
            read_at: row.try_get("read_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.data_str("title")
    }

    /// `body`, falling back to `message`.
    pub fn body(&self) -> Option<&str> {
        self.data_str("body")
            .filter(|b| !b.is_empty())
            .or_else(|| self.data_str("message"))
    }

    pub fn url(&self) -> Option<&str> {
        self.data_str("url")
    }

    pub fn actor_name(&self) -> Option<&str> {
        self.data_str("actor_name")
    }
}
