//! Per-form business rules checked before a submit or update touches the database.

use chrono::NaiveDateTime;
use retrack_auth::User;
use retrack_database::clock::{format_date, today, TIMESTAMP_FORMAT};
use retrack_database::codec::{bind_values, value_as_i64};
use retrack_database::schema::{quote_ident, table_columns};
use retrack_database::{EngineRepository, WorkflowRule};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use super::error::ServiceError;
use crate::registry::ModelSpec;

const NO_ID: i64 = -1;

/// The non-empty object posted for `table`.
fn section<'a>(payload: &'a Value, table: &str) -> Option<&'a Value> {
    payload
        .get(table)
        .filter(|value| value.as_object().is_some_and(|map| !map.is_empty()))
}

fn text_field(section: Option<&Value>, field: &str) -> String {
    match section.and_then(|s| s.get(field)) {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

async fn exists(pool: &SqlitePool, sql: &str, binds: Vec<Value>) -> Result<bool, ServiceError> {
    let row = bind_values(sqlx::query(sql), &binds).fetch_one(pool).await?;
    let count: i64 = row.try_get(0)?;
    Ok(count > 0)
}

/// Validate `payload` for `form_name`. `editing` is the route id on update.
///
/// Some rules write normalised values back into the payload.
pub async fn validate(
    pool: &SqlitePool,
    form_name: &str,
    payload: &mut Value,
    editing: Option<i64>,
    actor: &User,
) -> Result<(), ServiceError> {
    match form_name {
        "form-mentees" => validate_mentee(pool, payload, editing).await,
        "form-mentors" => validate_staff_email(pool, payload, editing, "mentors").await,
        "form-admins" => validate_staff_email(pool, payload, editing, "admins").await,
        "laporan-mentee" => validate_laporan(pool, payload, editing).await,
        "form-health" => validate_health(pool, payload, editing, actor).await,
        "lapor-diri" => validate_lapor_diri(pool, payload, editing).await,
        _ => Ok(()),
    }
}

async fn validate_mentee(pool: &SqlitePool, payload: &Value, editing: Option<i64>) -> Result<(), ServiceError> {
    let id_prospek = text_field(section(payload, "mentees"), "id_prospek");
    let email = text_field(section(payload, "users"), "email");

    if id_prospek.is_empty() {
        return Err(ServiceError::invalid("ID prospek tidak dijumpai."));
    }
    if email.is_empty() {
        return Err(ServiceError::invalid("Email tidak dijumpai."));
    }

    let editing = editing.unwrap_or(NO_ID);

    let prospek_taken = exists(
        pool,
        "SELECT COUNT(*) FROM mentees WHERE id_prospek = ? AND id != ? AND user_id != ?",
        vec![Value::String(id_prospek), Value::from(editing), Value::from(editing)],
    )
    .await?;
    if prospek_taken {
        return Err(ServiceError::unprocessable("Maaf, prospek dengan SMPP tersebut sudah ada."));
    }

    let email_taken = exists(
        pool,
        "SELECT COUNT(*) FROM users WHERE LOWER(email) = LOWER(?) AND id != ? \
         AND id NOT IN (SELECT user_id FROM mentees WHERE id = ?)",
        vec![Value::String(email), Value::from(editing), Value::from(editing)],
    )
    .await?;
    if email_taken {
        return Err(ServiceError::unprocessable("Maaf, prospek dengan Emel tersebut sudah ada."));
    }

    Ok(())
}

async fn validate_staff_email(
    pool: &SqlitePool,
    payload: &Value,
    editing: Option<i64>,
    profile_table: &str,
) -> Result<(), ServiceError> {
    let email = text_field(section(payload, "users"), "email");
    if email.is_empty() {
        return Ok(());
    }

    let editing = editing.unwrap_or(NO_ID);
    let sql = format!(
        "SELECT COUNT(*) FROM users WHERE LOWER(email) = LOWER(?) AND id != ? \
         AND id NOT IN (SELECT user_id FROM {} WHERE id = ?)",
        quote_ident(profile_table)?
    );
    let taken = exists(
        pool,
        &sql,
        vec![Value::String(email), Value::from(editing), Value::from(editing)],
    )
    .await?;
    if taken {
        return Err(ServiceError::unprocessable("Maaf, email tersebut sudah digunakan."));
    }
    Ok(())
}

async fn validate_laporan(pool: &SqlitePool, payload: &Value, editing: Option<i64>) -> Result<(), ServiceError> {
    let data = section(payload, "laporan_mentee").or_else(|| section(payload, "laporan"));
    let mentee_id = data
        .and_then(|d| d.get("mentee_id"))
        .and_then(value_as_i64)
        .filter(|id| *id > 0)
        .ok_or_else(|| ServiceError::invalid("ID mentee tidak dijumpai atau tidak sah."))?;

    let taken = exists(
        pool,
        "SELECT COUNT(*) FROM laporan WHERE mentee_id = ? AND date(created_at) = ? AND id != ?",
        vec![Value::from(mentee_id), Value::String(today()), Value::from(editing.unwrap_or(NO_ID))],
    )
    .await?;
    if taken {
        return Err(ServiceError::unprocessable(
            "Maaf, anda hanya dibenarkan menghantar satu laporan sehari.",
        ));
    }
    Ok(())
}

async fn validate_health(
    pool: &SqlitePool,
    payload: &mut Value,
    editing: Option<i64>,
    actor: &User,
) -> Result<(), ServiceError> {
    let given = section(payload, "health_monitorings")
        .and_then(|d| d.get("mentee_id"))
        .filter(|v| !v.is_null())
        .cloned();

    let mentee_id = match given {
        Some(value) => value_as_i64(&value)
            .filter(|id| *id > 0)
            .ok_or_else(|| ServiceError::invalid("ID mentee tidak dijumpai atau tidak sah."))?,
        None => {
            let id = actor.id;
            if let Some(map) = payload.as_object_mut() {
                let entry = map
                    .entry("health_monitorings")
                    .or_insert_with(|| Value::Object(Default::default()));
                if let Some(section) = entry.as_object_mut() {
                    section.insert("mentee_id".to_string(), Value::from(id));
                }
            }
            id
        }
    };

    let taken = exists(
        pool,
        "SELECT COUNT(*) FROM health_monitorings WHERE mentee_id = ? AND date(created_at) = ? AND id != ?",
        vec![Value::from(mentee_id), Value::String(today()), Value::from(editing.unwrap_or(NO_ID))],
    )
    .await?;
    if taken {
        return Err(ServiceError::unprocessable(
            "Maaf, anda hanya dibenarkan menghantar satu laporan kesihatan sehari.",
        ));
    }
    Ok(())
}

/// `YYYY-MM-DDTHH:MM` and `YYYY-MM-DD HH:MM` gain seconds; anything else must already be a full timestamp.
pub fn normalise_lapor_diri_pada(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim().replacen('T', " ", 1);
    let candidate = if raw.len() == 16 { format!("{raw}:00") } else { raw };
    NaiveDateTime::parse_from_str(&candidate, TIMESTAMP_FORMAT).ok()
}

async fn validate_lapor_diri(pool: &SqlitePool, payload: &mut Value, editing: Option<i64>) -> Result<(), ServiceError> {
    let data = section(payload, "lapordiri");
    let tempat = text_field(data, "tempat");
    let mentee_id = text_field(data, "mentee_id");
    let raw = text_field(data, "lapor_diri_pada");

    if tempat.is_empty() || mentee_id.is_empty() || raw.is_empty() {
        return Err(ServiceError::invalid("Data tidak lengkap untuk Lapor Diri."));
    }

    let at = normalise_lapor_diri_pada(&raw)
        .ok_or_else(|| ServiceError::unprocessable("Tarikh & Masa Lapor Diri tidak sah."))?;
    let stamp = at.format(TIMESTAMP_FORMAT).to_string();
    let date = format_date(at.date());
    let editing = editing.unwrap_or(NO_ID);

    let slot_taken = exists(
        pool,
        "SELECT COUNT(*) FROM lapordiri WHERE tempat = ? AND lapor_diri_pada = ? AND id != ?",
        vec![Value::String(tempat), Value::String(stamp.clone()), Value::from(editing)],
    )
    .await?;
    if slot_taken {
        return Err(ServiceError::unprocessable(
            "Sila pilih slot lain. Tarikh dan masa tersebut tidak tersedia di tempat tersebut.",
        ));
    }

    let day_taken = exists(
        pool,
        "SELECT COUNT(*) FROM lapordiri WHERE mentee_id = ? AND date(lapor_diri_pada) = ? AND id != ?",
        vec![Value::String(mentee_id), Value::String(date), Value::from(editing)],
    )
    .await?;
    if day_taken {
        return Err(ServiceError::unprocessable(
            "Mentee telah mempunyai rekod Lapor Diri pada tarikh ini. Sila kemas kini rekod Lapor Diri yang sedia ada.",
        ));
    }

    if let Some(section) = payload.get_mut("lapordiri").and_then(Value::as_object_mut) {
        section.insert("lapor_diri_pada".to_string(), Value::String(stamp));
    }
    Ok(())
}

/// Run the `before_create` workflow rules of `model` against the row about to be inserted.
pub async fn run_before_create(
    pool: &SqlitePool,
    engine: &EngineRepository,
    model: &ModelSpec,
    row: &Value,
) -> Result<(), ServiceError> {
    let rules = engine.workflow_rules_for(model.name, "before_create").await?;
    if rules.is_empty() {
        return Ok(());
    }

    let columns = table_columns(pool, model.table).await?;
    for rule in &rules {
        match rule.rule_type.as_str() {
            "unique_per_day" => check_unique_per_day(pool, model, &columns, rule, row).await?,
            other => debug!(rule = rule.id, kind = other, "workflow rule not applied before create"),
        }
    }
    Ok(())
}

async fn check_unique_per_day(
    pool: &SqlitePool,
    model: &ModelSpec,
    columns: &[String],
    rule: &WorkflowRule,
    row: &Value,
) -> Result<(), ServiceError> {
    let date_column = rule.date_column();
    if !columns.iter().any(|c| c == &rule.field) || !columns.iter().any(|c| c == date_column) {
        warn!(rule = rule.id, field = %rule.field, "workflow rule names unknown columns");
        return Ok(());
    }
    let Some(value) = row.get(&rule.field).filter(|v| !v.is_null()) else {
        return Ok(());
    };

    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ? AND date({}) = ?",
        quote_ident(model.table)?,
        quote_ident(&rule.field)?,
        quote_ident(date_column)?
    );
    if exists(pool, &sql, vec![value.clone(), Value::String(today())]).await? {
        let message = rule
            .message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Duplicate entry for today.".to_string());
        return Err(ServiceError::unprocessable(message));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::model;
    use crate::services::test_utils::{create_laporan, create_mentee, create_mentor, create_test_db, create_user};
    use retrack_auth::UserRole;
    use retrack_database::clock::now_timestamp;
    use serde_json::json;

    #[test]
    fn lapor_diri_times_gain_seconds() {
        let at = normalise_lapor_diri_pada("2025-08-01T09:30").unwrap();
        assert_eq!(at.format(TIMESTAMP_FORMAT).to_string(), "2025-08-01 09:30:00");
        assert!(normalise_lapor_diri_pada("2025-08-01 09:30").is_some());
        assert!(normalise_lapor_diri_pada("2025-08-01 09:30:15").is_some());
        assert!(normalise_lapor_diri_pada("esok pagi").is_none());
    }

    #[tokio::test]
    async fn mentee_form_requires_identifiers() {
        let (pool, _dir) = create_test_db().await;
        let actor = create_user(&pool, "Admin", "admin@example.com", UserRole::Admin).await;

        let mut payload = json!({"users": {"email": "x@example.com"}, "mentees": {}});
        let err = validate(&pool, "form-mentees", &mut payload, None, &actor).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(ref m) if m == "ID prospek tidak dijumpai."));

        let mut payload = json!({"users": {}, "mentees": {"id_prospek": "P-9"}});
        let err = validate(&pool, "form-mentees", &mut payload, None, &actor).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(ref m) if m == "Email tidak dijumpai."));
    }

    #[tokio::test]
    async fn mentee_form_uniqueness_excludes_the_edited_record() {
        let (pool, _dir) = create_test_db().await;
        let actor = create_user(&pool, "Admin", "admin@example.com", UserRole::Admin).await;
        let mentee = create_mentee(&pool, "Mentee", "mentee@example.com", "P-1", None).await;

        let mut payload = json!({"users": {"email": "new@example.com"}, "mentees": {"id_prospek": "P-1"}});
        let err = validate(&pool, "form-mentees", &mut payload, None, &actor).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(ref m) if m.contains("SMPP")));

        let mut payload = json!({"users": {"email": "MENTEE@example.com"}, "mentees": {"id_prospek": "P-2"}});
        let err = validate(&pool, "form-mentees", &mut payload, None, &actor).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(ref m) if m.contains("Emel")));

        let mut payload = json!({"users": {"email": "mentee@example.com"}, "mentees": {"id_prospek": "P-1"}});
        validate(&pool, "form-mentees", &mut payload, Some(mentee.id), &actor).await.unwrap();
    }

    #[tokio::test]
    async fn mentor_email_must_be_unique() {
        let (pool, _dir) = create_test_db().await;
        let mentor = create_mentor(&pool, "Mentor", "mentor@example.com", "Gombak").await;

        let mut payload = json!({"users": {"email": "Mentor@Example.com"}});
        let err = validate(&pool, "form-admins", &mut payload, None, &mentor).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(ref m) if m == "Maaf, email tersebut sudah digunakan."));

        validate(&pool, "form-mentors", &mut payload, Some(mentor.id), &mentor).await.unwrap();
    }

    #[tokio::test]
    async fn one_laporan_per_day() {
        let (pool, _dir) = create_test_db().await;
        let mentee = create_mentee(&pool, "Mentee", "mentee@example.com", "P-1", None).await;

        let mut payload = json!({"laporan": {"mentee_id": "abc"}});
        let err = validate(&pool, "laporan-mentee", &mut payload, None, &mentee).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));

        let mut payload = json!({"laporan": {"mentee_id": mentee.id}});
        validate(&pool, "laporan-mentee", &mut payload, None, &mentee).await.unwrap();

        let existing = create_laporan(&pool, mentee.id, None, &now_timestamp()).await;
        let err = validate(&pool, "laporan-mentee", &mut payload, None, &mentee).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(_)));

        validate(&pool, "laporan-mentee", &mut payload, Some(existing), &mentee).await.unwrap();
    }

    #[tokio::test]
    async fn empty_laporan_mentee_section_falls_back_to_laporan() {
        let (pool, _dir) = create_test_db().await;
        let mentee = create_mentee(&pool, "Mentee", "mentee@example.com", "P-1", None).await;

        let mut payload = json!({"laporan_mentee": {}, "laporan": {"mentee_id": mentee.id}});
        validate(&pool, "laporan-mentee", &mut payload, None, &mentee).await.unwrap();

        create_laporan(&pool, mentee.id, None, &now_timestamp()).await;
        let err = validate(&pool, "laporan-mentee", &mut payload, None, &mentee).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(ref m) if m.starts_with("Maaf")));
    }

    #[tokio::test]
    async fn health_form_defaults_mentee_to_actor() {
        let (pool, _dir) = create_test_db().await;
        let mentee = create_mentee(&pool, "Mentee", "mentee@example.com", "P-1", None).await;

        let mut payload = json!({"health_monitorings": {"mood": 3}});
        validate(&pool, "form-health", &mut payload, None, &mentee).await.unwrap();
        assert_eq!(payload["health_monitorings"]["mentee_id"], json!(mentee.id));
    }

    #[tokio::test]
    async fn lapor_diri_slots_and_days() {
        let (pool, _dir) = create_test_db().await;
        let a = create_mentee(&pool, "A", "a@example.com", "P-1", None).await;
        let b = create_mentee(&pool, "B", "b@example.com", "P-2", None).await;

        let mut payload = json!({"lapordiri": {"tempat": "PPD Gombak"}});
        let err = validate(&pool, "lapor-diri", &mut payload, None, &a).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));

        let mut payload = json!({"lapordiri": {"tempat": "PPD Gombak", "mentee_id": a.id, "lapor_diri_pada": "semalam"}});
        let err = validate(&pool, "lapor-diri", &mut payload, None, &a).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(ref m) if m == "Tarikh & Masa Lapor Diri tidak sah."));

        let mut payload = json!({"lapordiri": {"tempat": "PPD Gombak", "mentee_id": a.id, "lapor_diri_pada": "2025-08-01T09:30"}});
        validate(&pool, "lapor-diri", &mut payload, None, &a).await.unwrap();
        assert_eq!(payload["lapordiri"]["lapor_diri_pada"], json!("2025-08-01 09:30:00"));

        sqlx::query("INSERT INTO lapordiri (tempat, mentee_id, lapor_diri_pada) VALUES ('PPD Gombak', ?, '2025-08-01 09:30:00')")
            .bind(a.id)
            .execute(&pool)
            .await
            .unwrap();

        let mut clash = json!({"lapordiri": {"tempat": "PPD Gombak", "mentee_id": b.id, "lapor_diri_pada": "2025-08-01 09:30"}});
        let err = validate(&pool, "lapor-diri", &mut clash, None, &b).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(ref m) if m.starts_with("Sila pilih slot lain")));

        let mut same_day = json!({"lapordiri": {"tempat": "PPD Kuantan", "mentee_id": a.id, "lapor_diri_pada": "2025-08-01 15:00"}});
        let err = validate(&pool, "lapor-diri", &mut same_day, None, &a).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(ref m) if m.starts_with("Mentee telah")));
    }

    #[tokio::test]
    async fn unique_per_day_workflow_rule() {
        let (pool, _dir) = create_test_db().await;
        let engine = EngineRepository::new(pool.clone());
        let mentee = create_mentee(&pool, "Mentee", "mentee@example.com", "P-1", None).await;
        sqlx::query(
            "INSERT INTO workflow_rules (model, \"trigger\", type, field, message) \
             VALUES ('Laporan', 'before_create', 'unique_per_day', 'mentee_id', NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let spec = model("Laporan").unwrap();
        let row = json!({"mentee_id": mentee.id});
        run_before_create(&pool, &engine, spec, &row).await.unwrap();

        create_laporan(&pool, mentee.id, None, &now_timestamp()).await;
        let err = run_before_create(&pool, &engine, spec, &row).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unprocessable(ref m) if m == "Duplicate entry for today."));
    }
}
