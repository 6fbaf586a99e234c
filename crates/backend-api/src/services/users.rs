use retrack_auth::{User, UserRole};
use retrack_database::{Record, RecordRepository};
use serde_json::Value;
use sqlx::SqlitePool;

use super::error::ServiceError;
use super::relations::strip_hidden;
use crate::registry::model_for_table;

/// Profile table holding the role-specific row of a user.
pub fn profile_table(role: Option<UserRole>) -> Option<&'static str> {
    match role? {
        UserRole::Mentor => Some("mentors"),
        UserRole::Mentee => Some("mentees"),
        UserRole::Admin | UserRole::Superadmin => Some("admins"),
        UserRole::Dev => None,
    }
}

/// The caller's `mentors`, `admins` or `mentees` row, when one exists.
pub async fn profile(pool: &SqlitePool, user: &User) -> Result<Option<Record>, ServiceError> {
    let Some(table) = profile_table(user.role()) else {
        return Ok(None);
    };

    let mut conn = pool.acquire().await?;
    let mut record = RecordRepository::find_by(&mut conn, table, "user_id", &Value::from(user.id)).await?;
    if let (Some(record), Some(model)) = (record.as_mut(), model_for_table(table)) {
        strip_hidden(model, record);
    }
    Ok(record)
}
