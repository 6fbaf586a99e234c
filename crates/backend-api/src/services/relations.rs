//! Eager loading, relation counts and relation filters over registry models.
//!
//! Loads run one batched `IN` query per relation.

use std::collections::HashMap;

use retrack_database::codec::{bind_values, rows_to_records, value_to_text};
use retrack_database::schema::{quote_ident, table_columns};
use retrack_database::Record;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tracing::warn;

use super::error::ServiceError;
use crate::registry::{ModelSpec, RelationKind, RelationSpec};

/// A relation to load, optionally restricted to some columns of the related rows.
#[derive(Debug, Clone)]
pub struct EagerLoad {
    pub relation: &'static RelationSpec,
    pub columns: Option<Vec<String>>,
}

impl EagerLoad {
    /// Parse `name` or `name:col_a,col_b`. `None` when `model` has no such relation.
    pub fn parse(model: &ModelSpec, spec: &str) -> Option<Self> {
        let (name, columns) = match spec.split_once(':') {
            Some((name, columns)) => {
                let columns: Vec<String> = columns
                    .split(',')
                    .map(str::trim)
                    .filter(|column| !column.is_empty())
                    .map(str::to_string)
                    .collect();
                (name.trim(), Some(columns).filter(|c| !c.is_empty()))
            }
            None => (spec.trim(), None),
        };

        let relation = model.relation(name)?;
        Some(Self { relation, columns })
    }
}

/// Value forms accepted by listing filters.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    NotEq(Value),
    Like(String),
    In(Vec<Value>),
}

impl Condition {
    /// `{in: [...]}`, `like:<pattern>`, `!=<value>`, a list, or a plain value.
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Object(map) => map.get("in").map(|items| match items {
                Value::Array(items) => Condition::In(items.clone()),
                single => Condition::In(vec![single.clone()]),
            }),
            Value::Array(items) => Some(Condition::In(items.clone())),
            Value::String(text) => {
                if let Some(pattern) = text.strip_prefix("like:") {
                    Some(Condition::Like(pattern.to_string()))
                } else if let Some(rest) = text.strip_prefix("!=") {
                    Some(Condition::NotEq(Value::String(rest.to_string())))
                } else {
                    Some(Condition::Eq(value.clone()))
                }
            }
            other => Some(Condition::Eq(other.clone())),
        }
    }

    /// Equality, or `IN` for a list.
    pub fn parse_plain(value: &Value) -> Option<Self> {
        match value {
            Value::Null | Value::Object(_) => None,
            Value::Array(items) => Some(Condition::In(items.clone())),
            other => Some(Condition::Eq(other.clone())),
        }
    }

    /// SQL for `column` (already quoted), pushing bound values onto `params`.
    pub fn to_sql(&self, column: &str, params: &mut Vec<Value>) -> String {
        match self {
            Condition::Eq(value) => {
                params.push(value.clone());
                format!("{column} = ?")
            }
            Condition::NotEq(value) => {
                params.push(value.clone());
                format!("{column} != ?")
            }
            Condition::Like(pattern) => {
                params.push(Value::String(pattern.clone()));
                format!("{column} LIKE ?")
            }
            Condition::In(items) if items.is_empty() => "0 = 1".to_string(),
            Condition::In(items) => {
                params.extend(items.iter().cloned());
                format!("{column} IN ({})", placeholders(items.len()))
            }
        }
    }
}

pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

pub fn strip_hidden(model: &ModelSpec, record: &mut Record) {
    for column in model.hidden {
        record.remove(*column);
    }
}

fn related_model(relation: &RelationSpec) -> Result<&'static ModelSpec, ServiceError> {
    relation
        .related_model()
        .ok_or_else(|| ServiceError::internal(format!("unknown related model {}", relation.related)))
}

fn distinct_keys(rows: &[Record], column: &str) -> Vec<Value> {
    let mut seen = Vec::<String>::new();
    let mut keys = Vec::new();
    for row in rows {
        let Some(value) = row.get(column).filter(|value| !value.is_null()) else {
            continue;
        };
        if let Some(text) = value_to_text(value) {
            if !seen.contains(&text) {
                seen.push(text);
                keys.push(value.clone());
            }
        }
    }
    keys
}

/// Columns to read from the related table. The match key is always included.
async fn related_columns(
    pool: &SqlitePool,
    related: &ModelSpec,
    requested: Option<&[String]>,
    key: &str,
) -> Result<Vec<String>, ServiceError> {
    let real = table_columns(pool, related.table).await?;
    let mut columns: Vec<String> = match requested {
        None => real.iter().filter(|c| !related.is_hidden(c)).cloned().collect(),
        Some(requested) => {
            let mut picked = Vec::new();
            for column in requested {
                if real.contains(column) && !related.is_hidden(column) && !picked.contains(column) {
                    picked.push(column.clone());
                }
            }
            picked
        }
    };
    if !columns.iter().any(|c| c == key) {
        columns.insert(0, key.to_string());
    }
    Ok(columns)
}

pub async fn load_relations(
    pool: &SqlitePool,
    parent: &ModelSpec,
    rows: &mut [Record],
    loads: &[EagerLoad],
) -> Result<(), ServiceError> {
    for load in loads {
        load_relation(pool, parent, rows, load).await?;
    }
    Ok(())
}

async fn load_relation(
    pool: &SqlitePool,
    parent: &ModelSpec,
    rows: &mut [Record],
    load: &EagerLoad,
) -> Result<(), ServiceError> {
    let relation = load.relation;
    let related = related_model(relation)?;
    let parent_key = relation.parent_key(parent);
    let related_key = relation.related_key(related);

    let keys = distinct_keys(rows, parent_key);
    let columns = related_columns(pool, related, load.columns.as_deref(), related_key).await?;

    let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
    if !keys.is_empty() {
        let select = columns
            .iter()
            .map(|column| quote_ident(column).map(|quoted| format!("r.{quoted}")))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        let soft = if related.soft_deletes {
            " AND r.\"deleted_at\" IS NULL"
        } else {
            ""
        };
        let table = quote_ident(related.table)?;

        let (sql, match_column) = match relation.kind {
            RelationKind::BelongsTo { .. } | RelationKind::HasMany { .. } => (
                format!(
                    "SELECT {select} FROM {table} r WHERE r.{} IN ({}){soft}",
                    quote_ident(related_key)?,
                    placeholders(keys.len())
                ),
                related_key,
            ),
            RelationKind::BelongsToMany {
                pivot,
                parent_pivot_key,
                related_pivot_key,
            } => (
                format!(
                    "SELECT {select}, p.{ppk} AS \"__pivot_parent\", p.{rpk} AS \"__pivot_related\" \
                     FROM {table} r JOIN {pivot} p ON p.{rpk} = r.{pk} WHERE p.{ppk} IN ({marks}){soft}",
                    ppk = quote_ident(parent_pivot_key)?,
                    rpk = quote_ident(related_pivot_key)?,
                    pivot = quote_ident(pivot)?,
                    pk = quote_ident(related.primary_key)?,
                    marks = placeholders(keys.len()),
                ),
                "__pivot_parent",
            ),
        };

        let found = bind_values(sqlx::query(&sql), &keys).fetch_all(pool).await?;
        for mut record in rows_to_records(&found)? {
            let Some(key) = record.get(match_column).and_then(value_to_text) else {
                continue;
            };
            if let RelationKind::BelongsToMany {
                parent_pivot_key,
                related_pivot_key,
                ..
            } = relation.kind
            {
                let mut pivot = Map::new();
                pivot.insert(
                    parent_pivot_key.to_string(),
                    record.remove("__pivot_parent").unwrap_or(Value::Null),
                );
                pivot.insert(
                    related_pivot_key.to_string(),
                    record.remove("__pivot_related").unwrap_or(Value::Null),
                );
                record.insert("pivot".to_string(), Value::Object(pivot));
            }
            strip_hidden(related, &mut record);
            grouped.entry(key).or_default().push(record);
        }
    }

    let output_key = relation.output_key();
    for row in rows.iter_mut() {
        let matched = row
            .get(parent_key)
            .and_then(value_to_text)
            .and_then(|key| grouped.get(&key));
        let value = if relation.is_many() {
            Value::Array(
                matched
                    .map(|items| items.iter().cloned().map(Value::Object).collect())
                    .unwrap_or_default(),
            )
        } else {
            matched
                .and_then(|items| items.first())
                .cloned()
                .map(Value::Object)
                .unwrap_or(Value::Null)
        };
        row.insert(output_key.clone(), value);
    }

    Ok(())
}

/// Adds `{relation}_count` to every row for each to-many relation in `names`.
pub async fn load_counts(
    pool: &SqlitePool,
    parent: &ModelSpec,
    rows: &mut [Record],
    names: &[&str],
) -> Result<(), ServiceError> {
    for name in names {
        let Some(relation) = parent.relation(name) else {
            warn!(model = parent.name, relation = name, "count requested for unknown relation");
            continue;
        };
        let related = related_model(relation)?;
        let parent_key = relation.parent_key(parent);
        let keys = distinct_keys(rows, parent_key);

        let mut counts: HashMap<String, i64> = HashMap::new();
        if !keys.is_empty() {
            let table = quote_ident(related.table)?;
            let soft = if related.soft_deletes {
                " AND r.\"deleted_at\" IS NULL"
            } else {
                ""
            };
            let sql = match relation.kind {
                RelationKind::HasMany { foreign_key, .. } => {
                    let fk = quote_ident(foreign_key)?;
                    format!(
                        "SELECT r.{fk} AS k, COUNT(*) AS c FROM {table} r WHERE r.{fk} IN ({}){soft} GROUP BY r.{fk}",
                        placeholders(keys.len())
                    )
                }
                RelationKind::BelongsToMany {
                    pivot,
                    parent_pivot_key,
                    related_pivot_key,
                } => {
                    let ppk = quote_ident(parent_pivot_key)?;
                    format!(
                        "SELECT p.{ppk} AS k, COUNT(*) AS c FROM {pivot} p JOIN {table} r ON r.{pk} = p.{rpk} \
                         WHERE p.{ppk} IN ({marks}){soft} GROUP BY p.{ppk}",
                        pivot = quote_ident(pivot)?,
                        pk = quote_ident(related.primary_key)?,
                        rpk = quote_ident(related_pivot_key)?,
                        marks = placeholders(keys.len()),
                    )
                }
                RelationKind::BelongsTo { .. } => {
                    warn!(model = parent.name, relation = name, "counts need a to-many relation");
                    continue;
                }
            };

            let found = bind_values(sqlx::query(&sql), &keys).fetch_all(pool).await?;
            for record in rows_to_records(&found)? {
                if let (Some(key), Some(count)) = (
                    record.get("k").and_then(value_to_text),
                    record.get("c").and_then(Value::as_i64),
                ) {
                    counts.insert(key, count);
                }
            }
        }

        let output_key = format!("{}_count", relation.output_key());
        for row in rows.iter_mut() {
            let count = row
                .get(parent_key)
                .and_then(value_to_text)
                .and_then(|key| counts.get(&key).copied())
                .unwrap_or(0);
            row.insert(output_key.clone(), Value::from(count));
        }
    }

    Ok(())
}

/// `EXISTS` clause filtering `parent` rows through `relation` on `related.column`.
pub fn relation_exists_clause(
    parent: &ModelSpec,
    relation: &RelationSpec,
    column: &str,
    condition: &Condition,
    params: &mut Vec<Value>,
) -> Result<String, ServiceError> {
    let related = related_model(relation)?;
    let base = quote_ident(parent.table)?;
    let table = quote_ident(related.table)?;
    let target = format!("r.{}", quote_ident(column)?);
    let soft = if related.soft_deletes {
        " AND r.\"deleted_at\" IS NULL"
    } else {
        ""
    };

    let clause = match relation.kind {
        RelationKind::BelongsTo {
            foreign_key,
            owner_key,
        } => format!(
            "EXISTS (SELECT 1 FROM {table} r WHERE r.{} = {base}.{} AND {}{soft})",
            quote_ident(owner_key)?,
            quote_ident(foreign_key)?,
            condition.to_sql(&target, params)
        ),
        RelationKind::HasMany {
            foreign_key,
            local_key,
        } => format!(
            "EXISTS (SELECT 1 FROM {table} r WHERE r.{} = {base}.{} AND {}{soft})",
            quote_ident(foreign_key)?,
            quote_ident(local_key)?,
            condition.to_sql(&target, params)
        ),
        RelationKind::BelongsToMany {
            pivot,
            parent_pivot_key,
            related_pivot_key,
        } => format!(
            "EXISTS (SELECT 1 FROM {table} r JOIN {} p ON p.{} = r.{} WHERE p.{} = {base}.{} AND {}{soft})",
            quote_ident(pivot)?,
            quote_ident(related_pivot_key)?,
            quote_ident(related.primary_key)?,
            quote_ident(parent_pivot_key)?,
            quote_ident(parent.primary_key)?,
            condition.to_sql(&target, params)
        ),
    };

    Ok(clause)
}
