//! Engine configuration entities

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Permission columns of `allowed_tables`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePermission {
    Create,
    Read,
    Update,
}

impl TablePermission {
    pub fn column(&self) -> &'static str {
        match self {
            TablePermission::Create => "\"create\"",
            TablePermission::Read => "\"read\"",
            TablePermission::Update => "\"update\"",
        }
    }
}

/// Binds a primary table to an optional related table for a named form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRelation {
    pub id: i64,
    pub form_name: String,
    pub primary_table: String,
    pub related_table: Option<String>,
    pub foreign_key: Option<String>,
    pub primary_column: Option<String>,
    /// `{related_field: primary_field}`
    pub field_copy_map: Option<Value>,
}

impl TableRelation {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let field_copy_map: Option<String> = row.try_get("field_copy_map")?;
        Ok(Self {
            id: row.try_get("id")?,
            form_name: row.try_get("form_name")?,
            primary_table: row.try_get("primary_table")?,
            related_table: row.try_get("related_table")?,
            foreign_key: row.try_get("foreign_key")?,
            primary_column: row.try_get("primary_column")?,
            field_copy_map: field_copy_map
                .filter(|raw| !raw.trim().is_empty())
                .and_then(|raw| serde_json::from_str(&raw).ok()),
        })
    }

    /// Related table name, join key and primary column, when all three are configured.
    pub fn related(&self) -> Option<(&str, &str, &str)> {
        match (&self.related_table, &self.foreign_key, &self.primary_column) {
            (Some(table), Some(fk), Some(pc)) if !table.is_empty() => {
                Some((table.as_str(), fk.as_str(), pc.as_str()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadTemplate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// A `notifications_config` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: i64,
    pub table_name: String,
    pub payload_template: PayloadTemplate,
    pub sender: Option<String>,
    pub receiver: Option<String>,
}

impl NotificationRule {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let raw_template: String = row.try_get("payload_template")?;
        let payload_template = serde_json::from_str(&raw_template).map_err(|e| sqlx::Error::ColumnDecode {
            index: "payload_template".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            table_name: row.try_get("table_name")?,
            payload_template,
            sender: row.try_get("sender")?,
            receiver: row.try_get("receiver")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRule {
    pub id: i64,
    pub model: String,
    pub trigger: String,
    pub rule_type: String,
    pub field: String,
    pub conditions: Option<Value>,
    pub message: Option<String>,
    pub notify: bool,
}

impl WorkflowRule {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let conditions: Option<String> = row.try_get("conditions")?;
        Ok(Self {
            id: row.try_get("id")?,
            model: row.try_get("model")?,
            trigger: row.try_get("trigger")?,
            rule_type: row.try_get("type")?,
            field: row.try_get("field")?,
            conditions: conditions.and_then(|raw| serde_json::from_str(&raw).ok()),
            message: row.try_get("message")?,
            notify: row.try_get("notify")?,
        })
    }

    /// Column holding the date compared by `unique_per_day`.
    pub fn date_column(&self) -> &str {
        self.conditions
            .as_ref()
            .and_then(|c| c.get("date_column"))
            .and_then(Value::as_str)
            .unwrap_or("created_at")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFormUpdateLog {
    pub form_name: String,
    pub table_name: String,
    pub record_id: i64,
    /// `{field: {old, new}}`
    pub changes: Value,
    pub updated_by: Option<i64>,
}
