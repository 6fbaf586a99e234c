//! Repository for the engine configuration tables.

use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::clock::now_timestamp;
use crate::entities::{NewFormUpdateLog, NotificationRule, TablePermission, TableRelation, WorkflowRule};
use crate::types::DatabaseResult;

/// Reads `allowed_tables`, `model_mappings`, `table_relations`,
/// `notifications_config` and `workflow_rules`, and writes `form_update_logs`.
#[derive(Clone)]
pub struct EngineRepository {
    pool: SqlitePool,
}

impl EngineRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Table names granted `permission`.
    pub async fn allowed_tables(&self, permission: TablePermission) -> DatabaseResult<Vec<String>> {
        let sql = format!(
            "SELECT table_name FROM allowed_tables WHERE {} = 1 ORDER BY table_name",
            permission.column()
        );
        let tables = sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(tables)
    }

    pub async fn is_table_allowed(&self, table: &str, permission: TablePermission) -> DatabaseResult<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM allowed_tables WHERE table_name = ? AND {} = 1",
            permission.column()
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// `model_mappings.model_class` for a table key.
    pub async fn model_class_for(&self, key: &str) -> DatabaseResult<Option<String>> {
        let class = sqlx::query_scalar::<_, String>("SELECT model_class FROM model_mappings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(class)
    }

    /// Relations configured for a form, in declaration order.
    pub async fn relations_for_form(&self, form_name: &str) -> DatabaseResult<Vec<TableRelation>> {
        let rows = sqlx::query(
            "SELECT id, form_name, primary_table, related_table, foreign_key, primary_column, field_copy_map
             FROM table_relations WHERE form_name = ? ORDER BY id",
        )
        .bind(form_name)
        .fetch_all(&self.pool)
        .await?;

        let relations = rows
            .iter()
            .map(TableRelation::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(relations)
    }

    pub async fn notification_rules_for(&self, table: &str) -> DatabaseResult<Vec<NotificationRule>> {
        let rows = sqlx::query(
            "SELECT id, table_name, payload_template, sender, receiver
             FROM notifications_config WHERE table_name = ? ORDER BY id",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let rules = rows
            .iter()
            .map(NotificationRule::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    pub async fn workflow_rules_for(&self, model: &str, trigger: &str) -> DatabaseResult<Vec<WorkflowRule>> {
        let rows = sqlx::query(
            "SELECT id, model, \"trigger\", type, field, conditions, message, notify
             FROM workflow_rules WHERE model = ? AND \"trigger\" = ? ORDER BY id",
        )
        .bind(model)
        .bind(trigger)
        .fetch_all(&self.pool)
        .await?;

        let rules = rows
            .iter()
            .map(WorkflowRule::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    /// Insert a change record. Takes a connection so it can join the caller's transaction.
    pub async fn insert_update_log(conn: &mut SqliteConnection, log: &NewFormUpdateLog) -> DatabaseResult<i64> {
        let now = now_timestamp();
        let changes = serde_json::to_string(&log.changes)?;

        let result = sqlx::query(
            "INSERT INTO form_update_logs (form_name, table_name, record_id, changes, updated_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.form_name)
        .bind(&log.table_name)
        .bind(log.record_id)
        .bind(changes)
        .bind(log.updated_by)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Number of change records stored for a record.
    pub async fn update_log_count(&self, table: &str, record_id: i64) -> DatabaseResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM form_update_logs WHERE table_name = ? AND record_id = ?")
            .bind(table)
            .bind(record_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }
}
