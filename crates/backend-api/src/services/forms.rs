//! Form submission and update across a primary and an optional related table.

use retrack_auth::{hash_password, new_public_id, User};
use retrack_database::clock::now_timestamp;
use retrack_database::codec::{value_as_i64, value_to_text};
use retrack_database::schema::{table_columns, table_columns_on};
use retrack_database::{
    EngineRepository, NewFormUpdateLog, Record, RecordRepository, TablePermission, TableRelation,
};
use serde_json::{json, Map, Value};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use super::error::ServiceError;
use super::{fanout, form_rules};
use crate::registry::{resolve_model, ModelSpec};

const SUBMISSION_FAILED: &str = "Submission failed";
const UPDATE_FAILED: &str = "Update failed";
const TABLE_NOT_ALLOWED: &str = "Table not allowed.";
const NEVER_LOGGED: [&str; 3] = ["password", "created_at", "updated_at"];

/// The section of `payload` for `table`: `payload[table]`, else flat `table[field]` keys.
pub fn table_payload(payload: &Value, table: &str) -> Record {
    if let Some(section) = payload.get(table).and_then(Value::as_object) {
        if !section.is_empty() {
            return section.clone();
        }
    }

    let prefix = format!("{table}[");
    payload
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(key, value)| {
                    key.strip_prefix(&prefix)
                        .and_then(|rest| rest.strip_suffix(']'))
                        .filter(|field| !field.is_empty())
                        .map(|field| (field.to_string(), value.clone()))
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn model_for(engine: &EngineRepository, table: &str) -> Result<&'static ModelSpec, ServiceError> {
    resolve_model(engine, table)
        .await?
        .ok_or_else(|| ServiceError::not_found("Model not found for this table."))
}

async fn ensure_allowed(
    engine: &EngineRepository,
    table: &str,
    permission: TablePermission,
) -> Result<(), ServiceError> {
    if engine.is_table_allowed(table, permission).await? {
        Ok(())
    } else {
        Err(ServiceError::forbidden(TABLE_NOT_ALLOWED))
    }
}

/// Keep fillable columns that exist, hash passwords and stamp generated columns.
fn prepare_row(
    model: &ModelSpec,
    columns: &[String],
    data: &Record,
    creating: bool,
) -> Result<Record, ServiceError> {
    let has = |column: &str| columns.iter().any(|c| c == column);

    let mut row: Record = data
        .iter()
        .filter(|(column, _)| model.is_fillable(column) && has(column))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect();

    match row.get("password").map(|value| value_to_text(value).unwrap_or_default()) {
        Some(password) if password.is_empty() => {
            row.remove("password");
        }
        Some(password) => {
            let hashed = hash_password(&password)
                .map_err(|e| ServiceError::internal(format!("password hashing failed: {e}")))?;
            row.insert("password".to_string(), Value::String(hashed));
        }
        None => {}
    }

    let now = Value::String(now_timestamp());
    if creating {
        if let Some(column) = model.uuid_column.filter(|c| has(c)) {
            row.entry(column.to_string())
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        }
        if let Some(column) = model.public_id_column.filter(|c| has(c)) {
            row.entry(column.to_string())
                .or_insert_with(|| Value::String(new_public_id()));
        }
        if has("created_at") {
            row.insert("created_at".to_string(), now.clone());
        }
    }
    if has("updated_at") {
        row.insert("updated_at".to_string(), now);
    }

    Ok(row)
}

/// `{field: {old, new}}` for every written field whose text differs.
fn diff(existing: &Record, row: &Record) -> Map<String, Value> {
    let mut changes = Map::new();
    for (field, new) in row {
        if NEVER_LOGGED.contains(&field.as_str()) {
            continue;
        }
        let old = existing.get(field).cloned().unwrap_or(Value::Null);
        let old_text = value_to_text(&old);
        let new_text = value_to_text(new);
        if old_text != new_text {
            changes.insert(field.clone(), json!({"old": old_text, "new": new_text}));
        }
    }
    changes
}

/// `POST /api/form-submit/{formName}`
pub async fn submit(pool: &SqlitePool, actor: &User, form_name: &str, mut payload: Value) -> Result<(), ServiceError> {
    form_rules::validate(pool, form_name, &mut payload, None, actor).await?;

    let engine = EngineRepository::new(pool.clone());
    let relation = engine
        .relations_for_form(form_name)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::bad_request("Form relation not defined."))?;

    ensure_allowed(&engine, &relation.primary_table, TablePermission::Create).await?;
    let primary_model = model_for(&engine, &relation.primary_table).await?;

    let related = match relation.related() {
        Some((table, _, _)) => {
            ensure_allowed(&engine, table, TablePermission::Create).await?;
            Some(model_for(&engine, table).await?)
        }
        None => None,
    };

    let columns = table_columns(pool, &relation.primary_table).await?;
    let primary_row = prepare_row(
        primary_model,
        &columns,
        &table_payload(&payload, &relation.primary_table),
        true,
    )?;
    form_rules::run_before_create(pool, &engine, primary_model, &Value::Object(primary_row.clone())).await?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| ServiceError::failed(SUBMISSION_FAILED, e))?;
    let primary = match insert_rows(&mut *tx, &relation, primary_model, primary_row, related, &payload).await {
        Ok(primary) => primary,
        Err(err) => {
            warn!(form = form_name, error = %err, "form submission rolled back");
            return Err(ServiceError::failed(SUBMISSION_FAILED, err));
        }
    };
    tx.commit()
        .await
        .map_err(|e| ServiceError::failed(SUBMISSION_FAILED, e))?;

    info!(form = form_name, table = %relation.primary_table, user_id = actor.id, "form submitted");
    fanout::notify_for_table(pool, &relation.primary_table, &primary, Some(actor)).await;
    Ok(())
}

async fn insert_rows(
    conn: &mut SqliteConnection,
    relation: &TableRelation,
    primary_model: &ModelSpec,
    primary_row: Record,
    related_model: Option<&ModelSpec>,
    payload: &Value,
) -> Result<Record, ServiceError> {
    let primary_table = relation.primary_table.as_str();
    let id = RecordRepository::insert(conn, primary_table, &primary_row).await?;
    let primary = RecordRepository::get_by(conn, primary_table, primary_model.primary_key, &Value::from(id)).await?;

    if let (Some((table, foreign_key, primary_column)), Some(model)) = (relation.related(), related_model) {
        let columns = table_columns_on(conn, table).await?;
        let mut row = prepare_row(model, &columns, &table_payload(payload, table), true)?;
        row.insert(
            foreign_key.to_string(),
            primary.get(primary_column).cloned().unwrap_or(Value::Null),
        );

        if let Some(copy_map) = relation.field_copy_map.as_ref().and_then(Value::as_object) {
            for (target, source) in copy_map {
                let copied = source
                    .as_str()
                    .and_then(|source| primary.get(source))
                    .filter(|value| !value.is_null());
                if let Some(value) = copied {
                    row.insert(target.clone(), value.clone());
                }
            }
        }

        RecordRepository::insert(conn, table, &row).await?;
    }

    Ok(primary)
}

/// `PUT /api/form-submit/{formName}/{id}`
pub async fn update(
    pool: &SqlitePool,
    actor: &User,
    form_name: &str,
    id: i64,
    mut payload: Value,
) -> Result<(), ServiceError> {
    form_rules::validate(pool, form_name, &mut payload, Some(id), actor).await?;

    let engine = EngineRepository::new(pool.clone());
    let relations = engine.relations_for_form(form_name).await?;
    let Some(first) = relations.first() else {
        return Err(ServiceError::bad_request("Form relation not defined."));
    };

    let primary_table = first.primary_table.clone();
    let primary_data = table_payload(&payload, &primary_table);
    if primary_data.is_empty() {
        return Err(ServiceError::bad_request(format!(
            "Missing data for primary table: {primary_table}"
        )));
    }
    ensure_allowed(&engine, &primary_table, TablePermission::Update).await?;
    let primary_model = model_for(&engine, &primary_table).await?;

    let mut related = Vec::new();
    for relation in &relations {
        let Some((table, foreign_key, primary_column)) = relation.related() else {
            continue;
        };
        let data = table_payload(&payload, table);
        if data.is_empty() {
            continue;
        }
        ensure_allowed(&engine, table, TablePermission::Update).await?;
        let model = model_for(&engine, table).await?;
        related.push(RelatedUpdate {
            model,
            foreign_key,
            primary_column,
            data,
        });
    }

    let mut tx = pool.begin().await.map_err(|e| ServiceError::failed(UPDATE_FAILED, e))?;
    let target = FormTarget {
        form_name,
        actor,
        id,
        model: primary_model,
    };
    if let Err(err) = update_rows(&mut *tx, &target, &primary_data, &related).await {
        warn!(form = form_name, id, error = %err, "form update rolled back");
        return Err(match err {
            ServiceError::NotFound(_) => err,
            other => ServiceError::failed(UPDATE_FAILED, other),
        });
    }
    tx.commit().await.map_err(|e| ServiceError::failed(UPDATE_FAILED, e))?;

    info!(form = form_name, id, user_id = actor.id, "form updated");
    Ok(())
}

struct FormTarget<'a> {
    form_name: &'a str,
    actor: &'a User,
    id: i64,
    model: &'static ModelSpec,
}

struct RelatedUpdate<'a> {
    model: &'static ModelSpec,
    foreign_key: &'a str,
    primary_column: &'a str,
    data: Record,
}

async fn update_rows(
    conn: &mut SqliteConnection,
    target: &FormTarget<'_>,
    primary_data: &Record,
    related: &[RelatedUpdate<'_>],
) -> Result<(), ServiceError> {
    let model = target.model;
    let key = Value::from(target.id);
    let existing = RecordRepository::find_by(conn, model.table, model.primary_key, &key)
        .await?
        .ok_or_else(|| ServiceError::not_found("Primary record not found."))?;

    let columns = table_columns_on(conn, model.table).await?;
    let row = prepare_row(model, &columns, primary_data, false)?;
    log_changes(conn, target, model.table, target.id, &existing, &row).await?;
    RecordRepository::update(conn, model.table, model.primary_key, &key, &row).await?;

    let mut primary = existing;
    primary.extend(row);

    for update in related {
        let table = update.model.table;
        let Some(link) = primary.get(update.primary_column).filter(|v| !v.is_null()) else {
            continue;
        };
        let Some(existing) = RecordRepository::find_by(conn, table, update.foreign_key, link).await? else {
            warn!(table, "related record missing, skipped");
            continue;
        };
        let related_key = existing
            .get(update.model.primary_key)
            .cloned()
            .unwrap_or(Value::Null);

        let columns = table_columns_on(conn, table).await?;
        let row = prepare_row(update.model, &columns, &update.data, false)?;
        if let Some(record_id) = value_as_i64(&related_key) {
            log_changes(conn, target, table, record_id, &existing, &row).await?;
        }
        RecordRepository::update(conn, table, update.model.primary_key, &related_key, &row).await?;
    }

    Ok(())
}

async fn log_changes(
    conn: &mut SqliteConnection,
    target: &FormTarget<'_>,
    table: &str,
    record_id: i64,
    existing: &Record,
    row: &Record,
) -> Result<(), ServiceError> {
    let changes = diff(existing, row);
    if changes.is_empty() {
        return Ok(());
    }

    EngineRepository::insert_update_log(
        conn,
        &NewFormUpdateLog {
            form_name: target.form_name.to_string(),
            table_name: table.to_string(),
            record_id,
            changes: Value::Object(changes),
            updated_by: Some(target.actor.id),
        },
    )
    .await?;
    Ok(())
}
