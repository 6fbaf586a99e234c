//! Read side of the CRUD engine: whitelisted listings and single-record lookups.

use retrack_database::codec::{bind_values, rows_to_records};
use retrack_database::schema::{quote_ident, table_columns};
use retrack_database::{EngineRepository, Record, RecordRepository, TablePermission};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tracing::debug;

use super::error::ServiceError;
use super::relations::{
    load_counts, load_relations, relation_exists_clause, strip_hidden, Condition, EagerLoad,
};
use crate::query::{list_param, string_param};
use crate::registry::{model_for_table, resolve_model, ModelSpec};

const TABLE_NOT_ALLOWED: &str = "Table not allowed.";

/// Report tables that default to the mentor/mentee relations.
const REPORT_TABLES: &[&str] = &["laporan", "lapordiri", "health_monitorings", "staff_monitorings"];

/// Eager loads applied by the plain listing, per table.
fn default_eager_loads(table: &str) -> &'static [&'static str] {
    match table {
        "mentors" | "admins" | "mentees" => &["user:id,name"],
        "laporan" | "lapordiri" | "health_monitorings" => &[
            "mentorAccount:id,name",
            "mentor:user_id,parol_daerah",
            "mentee:user_id,id_prospek",
            "menteeAccount:id,name",
        ],
        "staff_monitorings" => &[
            "user:id,name",
            "mentorAccount:id,name",
            "mentee:user_id,id_prospek,huraian_alamat,alamat_rumah",
            "csi:id,nama_syarikat,huraian_alamat,alamat_syarikat",
        ],
        "blogs" => &["categories"],
        _ => &[],
    }
}

fn default_counts(table: &str) -> &'static [&'static str] {
    match table {
        "mentors" => &["mentees"],
        _ => &[],
    }
}

/// Relations the join-filter listing may load or filter through.
fn join_filter_relations(table: &str) -> &'static [&'static str] {
    match table {
        "laporan" | "lapordiri" => &["mentor", "mentee", "mentorAccount"],
        "health_monitorings" => &["mentor", "mentee", "menteeAccount", "mentorAccount"],
        "staff_monitorings" => &["mentor", "mentee", "csi", "mentorAccount"],
        "blogs" => &["categories"],
        "mentors" => &["user"],
        "mentees" => &["mentor", "user"],
        _ => &[],
    }
}

/// Whitelisted, resolvable model for `table`.
async fn readable_model(
    engine: &EngineRepository,
    table: &str,
    missing_model: &str,
) -> Result<&'static ModelSpec, ServiceError> {
    if !engine.is_table_allowed(table, TablePermission::Read).await? {
        return Err(ServiceError::forbidden(TABLE_NOT_ALLOWED));
    }
    resolve_model(engine, table)
        .await?
        .ok_or_else(|| ServiceError::not_found(missing_model))
}

/// `columns=a,b` or `columns[]=a`.
fn requested_columns(query: &Value) -> Option<Vec<String>> {
    let columns: Vec<String> = match query.get("columns") {
        Some(Value::String(raw)) => raw
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(_)) => list_param(query, "columns"),
        _ => Vec::new(),
    };
    (!columns.is_empty()).then_some(columns)
}

/// A select over one model table, assembled from validated identifiers.
struct ListQuery {
    model: &'static ModelSpec,
    real_columns: Vec<String>,
    requested: Option<Vec<String>>,
    loads: Vec<EagerLoad>,
    counts: Vec<&'static str>,
    wheres: Vec<String>,
    params: Vec<Value>,
    order: Option<String>,
}

impl ListQuery {
    async fn new(pool: &SqlitePool, model: &'static ModelSpec) -> Result<Self, ServiceError> {
        let real_columns = table_columns(pool, model.table).await?;
        Ok(Self {
            model,
            real_columns,
            requested: None,
            loads: Vec::new(),
            counts: Vec::new(),
            wheres: Vec::new(),
            params: Vec::new(),
            order: None,
        })
    }

    fn has_column(&self, column: &str) -> bool {
        self.real_columns.iter().any(|c| c == column)
    }

    fn eager_load(&mut self, specs: &[&str]) {
        for spec in specs {
            if let Some(load) = EagerLoad::parse(self.model, spec) {
                self.loads.push(load);
            }
        }
    }

    /// `column` must already be known to exist.
    fn filter(&mut self, column: &str, condition: &Condition) -> Result<(), ServiceError> {
        let target = format!("{}.{}", quote_ident(self.model.table)?, quote_ident(column)?);
        let clause = condition.to_sql(&target, &mut self.params);
        self.wheres.push(clause);
        Ok(())
    }

    fn order_by(&mut self, column: Option<&str>, direction: Option<&str>) -> Result<bool, ServiceError> {
        let Some(column) = column.filter(|c| self.has_column(c)) else {
            return Ok(false);
        };
        let direction = match direction.map(str::to_ascii_lowercase).as_deref() {
            Some("desc") => "DESC",
            _ => "ASC",
        };
        self.order = Some(format!("{} {direction}", quote_ident(column)?));
        Ok(true)
    }

    fn order_by_key(&mut self, direction: &str) -> Result<(), ServiceError> {
        self.order = Some(format!("{} {direction}", quote_ident(self.model.primary_key)?));
        Ok(())
    }

    /// Columns to select plus the ones fetched only to key eager loads.
    fn selection(&self) -> (Vec<String>, Vec<String>) {
        let Some(requested) = &self.requested else {
            return (self.real_columns.clone(), Vec::new());
        };

        let mut columns: Vec<String> = Vec::new();
        for column in requested {
            if self.has_column(column) && !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        if !columns.iter().any(|c| c == self.model.primary_key) {
            columns.insert(0, self.model.primary_key.to_string());
        }

        let mut helpers = Vec::new();
        let relation_keys = self
            .loads
            .iter()
            .map(|load| load.relation)
            .chain(self.counts.iter().filter_map(|name| self.model.relation(name)))
            .map(|relation| relation.parent_key(self.model));
        for key in relation_keys {
            let key = key.to_string();
            if self.has_column(&key) && !columns.contains(&key) {
                columns.push(key.clone());
                helpers.push(key);
            }
        }

        (columns, helpers)
    }

    async fn fetch(mut self, pool: &SqlitePool) -> Result<Vec<Record>, ServiceError> {
        let model = self.model;
        if model.soft_deletes && self.has_column("deleted_at") {
            self.wheres
                .push(format!("{}.\"deleted_at\" IS NULL", quote_ident(model.table)?));
        }

        let (columns, helpers) = self.selection();
        let table = quote_ident(model.table)?;
        let select = columns
            .iter()
            .map(|column| quote_ident(column).map(|quoted| format!("{table}.{quoted}")))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");

        let mut sql = format!("SELECT {select} FROM {table}");
        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.wheres.join(" AND "));
        }
        if let Some(order) = &self.order {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        debug!(%sql, "listing query");

        let rows = bind_values(sqlx::query(&sql), &self.params).fetch_all(pool).await?;
        let mut records = rows_to_records(&rows)?;

        load_relations(pool, model, &mut records, &self.loads).await?;
        load_counts(pool, model, &mut records, &self.counts).await?;

        for record in records.iter_mut() {
            for helper in &helpers {
                record.remove(helper);
            }
            strip_hidden(model, record);
        }

        Ok(records)
    }
}

/// `GET /api/listing/{table}`
pub async fn list(pool: &SqlitePool, table: &str, query: &Value) -> Result<Vec<Record>, ServiceError> {
    let engine = EngineRepository::new(pool.clone());
    let model = readable_model(&engine, table, "Model not found for this table.").await?;

    let mut listing = ListQuery::new(pool, model).await?;
    listing.requested = requested_columns(query);
    listing.eager_load(default_eager_loads(model.table));
    listing.counts = default_counts(model.table).to_vec();

    if !listing.order_by(string_param(query, "order_by"), string_param(query, "order_dir"))? {
        listing.order_by_key("DESC")?;
    }

    listing.fetch(pool).await
}

/// `GET /api/listing-filter/{table}`
pub async fn list_filtered(
    pool: &SqlitePool,
    table: &str,
    query: &Value,
) -> Result<Vec<Record>, ServiceError> {
    let engine = EngineRepository::new(pool.clone());
    let model = readable_model(&engine, table, "Model not found.").await?;

    let mut listing = ListQuery::new(pool, model).await?;
    listing.requested = requested_columns(query);

    if let Some(Value::Object(filters)) = query.get("filters") {
        for (column, value) in filters {
            if !listing.has_column(column) {
                continue;
            }
            if let Some(condition) = Condition::parse_plain(value) {
                listing.filter(column, &condition)?;
            }
        }
    }

    listing.order_by_key("ASC")?;
    listing.fetch(pool).await
}

/// `GET /api/listing-join-filter/{table}`
pub async fn list_join_filtered(
    pool: &SqlitePool,
    table: &str,
    query: &Value,
) -> Result<Vec<Record>, ServiceError> {
    let engine = EngineRepository::new(pool.clone());
    let model = readable_model(&engine, table, "Model not found.").await?;
    let allowed = join_filter_relations(model.table);

    let mut listing = ListQuery::new(pool, model).await?;

    for spec in list_param(query, "with") {
        let name = spec.split(':').next().unwrap_or_default().trim();
        if !allowed.contains(&name) {
            continue;
        }
        if let Some(load) = EagerLoad::parse(model, &spec) {
            listing.loads.push(load);
        }
    }
    if listing.loads.is_empty() && REPORT_TABLES.contains(&model.table) {
        listing.eager_load(&["mentor", "mentee", "menteeAccount", "mentorAccount"]);
    }
    if model.table == "mentors" {
        listing.counts.push("mentees");
    }

    if let Some(Value::Object(filters)) = query.get("filters") {
        for (key, value) in filters {
            match key.split_once('.') {
                Some((relation_name, column)) => {
                    if !allowed.contains(&relation_name) {
                        continue;
                    }
                    let Some(relation) = model.relation(relation_name) else {
                        continue;
                    };
                    let Some(condition) = Condition::parse(value) else {
                        continue;
                    };
                    let Some(related) = relation.related_model() else {
                        continue;
                    };
                    if !table_columns(pool, related.table).await?.iter().any(|c| c == column) {
                        continue;
                    }
                    let clause =
                        relation_exists_clause(model, relation, column, &condition, &mut listing.params)?;
                    listing.wheres.push(clause);
                }
                None => {
                    if !listing.has_column(key) {
                        continue;
                    }
                    if let Some(condition) = Condition::parse_plain(value) {
                        listing.filter(key, &condition)?;
                    }
                }
            }
        }
    }

    if listing.has_column("updated_at") {
        let table_ref = quote_ident(model.table)?;
        if let Some(from) = string_param(query, "from") {
            listing.wheres.push(format!("date({table_ref}.\"updated_at\") >= date(?)"));
            listing.params.push(Value::String(from.to_string()));
        }
        if let Some(to) = string_param(query, "to") {
            listing.wheres.push(format!("date({table_ref}.\"updated_at\") <= date(?)"));
            listing.params.push(Value::String(to.to_string()));
        }
    }

    if !listing.order_by(string_param(query, "sort"), string_param(query, "order"))? {
        listing.order_by_key("ASC")?;
    }

    listing.fetch(pool).await
}

fn hide_columns(table: &str, record: &mut Record) {
    match model_for_table(table) {
        Some(model) => strip_hidden(model, record),
        None => {
            record.remove("password");
        }
    }
}

fn is_soft_deleted(model: &ModelSpec, record: &Record) -> bool {
    model.soft_deletes && record.get("deleted_at").is_some_and(|value| !value.is_null())
}

/// `GET /api/form-show/{formName}/{id}`
pub async fn show(pool: &SqlitePool, form_name: &str, id: i64) -> Result<Value, ServiceError> {
    let engine = EngineRepository::new(pool.clone());
    let relations = engine.relations_for_form(form_name).await?;
    let mut conn = pool.acquire().await?;

    let Some(first) = relations.first() else {
        let model = resolve_model(&engine, form_name)
            .await?
            .ok_or_else(|| ServiceError::not_found("Model not found."))?;
        if !engine.is_table_allowed(model.table, TablePermission::Read).await? {
            return Err(ServiceError::forbidden(TABLE_NOT_ALLOWED));
        }

        let mut record = RecordRepository::find_by(&mut conn, model.table, model.primary_key, &Value::from(id))
            .await?
            .filter(|record| !is_soft_deleted(model, record))
            .ok_or_else(|| ServiceError::not_found("Record not found."))?;
        strip_hidden(model, &mut record);
        return Ok(Value::Object(wrap("data", Value::Object(record))));
    };

    let primary_table = first.primary_table.as_str();
    let primary_key = model_for_table(primary_table)
        .map(|model| model.primary_key)
        .unwrap_or("id");
    let primary = RecordRepository::find_by(&mut conn, primary_table, primary_key, &Value::from(id))
        .await?
        .ok_or_else(|| ServiceError::not_found("Primary record not found."))?;

    let mut data = Map::new();
    for relation in &relations {
        let Some((related_table, foreign_key, primary_column)) = relation.related() else {
            continue;
        };
        let Some(key) = primary.get(primary_column).filter(|v| !v.is_null()) else {
            continue;
        };
        if let Some(mut related) = RecordRepository::find_by(&mut conn, related_table, foreign_key, key).await? {
            hide_columns(related_table, &mut related);
            data.insert(related_table.to_string(), Value::Object(related));
        }
    }

    let mut primary = primary;
    hide_columns(primary_table, &mut primary);
    data.insert(primary_table.to_string(), Value::Object(primary));

    Ok(Value::Object(wrap("data", Value::Object(data))))
}

fn wrap(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_query;
    use crate::services::test_utils::{create_laporan, create_mentee, create_mentor, create_test_db};
    use serde_json::json;

    #[tokio::test]
    async fn listing_rejects_tables_outside_the_whitelist() {
        let (pool, _dir) = create_test_db().await;
        let err = list(&pool, "sessions", &json!({})).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(ref msg) if msg == "Table not allowed."));
    }

    #[tokio::test]
    async fn listing_reports_missing_models() {
        let (pool, _dir) = create_test_db().await;
        sqlx::query("INSERT INTO allowed_tables (table_name, \"read\") VALUES ('widgets', 1)")
            .execute(&pool)
            .await
            .unwrap();
        let err = list(&pool, "widgets", &json!({})).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(ref msg) if msg == "Model not found for this table."));
    }

    #[tokio::test]
    async fn listing_keeps_primary_key_and_strips_helper_keys() {
        let (pool, _dir) = create_test_db().await;
        let mentor = create_mentor(&pool, "Mentor", "m@example.com", "Gombak").await;
        let mentee = create_mentee(&pool, "Mentee", "e@example.com", "P-1", Some(mentor.id)).await;
        create_laporan(&pool, mentee.id, Some(mentor.id), "2024-01-01 08:00:00").await;
        create_laporan(&pool, mentee.id, Some(mentor.id), "2024-01-02 08:00:00").await;

        let rows = list(&pool, "laporan", &parse_query("columns=tujuan,bogus")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0]["id"].as_i64().unwrap() > rows[1]["id"].as_i64().unwrap());

        let first = &rows[0];
        assert!(first.contains_key("tujuan"));
        assert!(!first.contains_key("bogus"));
        assert!(!first.contains_key("mentor_id"));
        assert_eq!(first["mentor_account"], json!({"id": mentor.id, "name": "Mentor"}));
        assert_eq!(first["mentor"], json!({"user_id": mentor.id, "parol_daerah": "Gombak"}));
        assert_eq!(first["mentee"], json!({"user_id": mentee.id, "id_prospek": "P-1"}));
    }

    #[tokio::test]
    async fn listing_orders_by_requested_column() {
        let (pool, _dir) = create_test_db().await;
        create_mentor(&pool, "Beta", "b@example.com", "Gombak").await;
        create_mentor(&pool, "Alpha", "a@example.com", "Kuantan").await;

        let rows = list(&pool, "mentors", &parse_query("order_by=nama_penuh&order_dir=sideways"))
            .await
            .unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["nama_penuh"].clone()).collect();
        assert_eq!(names, vec![json!("Alpha"), json!("Beta")]);
        assert_eq!(rows[0]["mentees_count"], json!(0));
    }

    #[tokio::test]
    async fn filtered_listing_supports_in_lists() {
        let (pool, _dir) = create_test_db().await;
        create_mentor(&pool, "A", "a@example.com", "Gombak").await;
        create_mentor(&pool, "B", "b@example.com", "Kuantan").await;
        create_mentor(&pool, "C", "c@example.com", "Jasin").await;

        let query = parse_query("filters[parol_daerah][]=Gombak&filters[parol_daerah][]=Jasin&filters[nope]=1");
        let rows = list_filtered(&pool, "mentors", &query).await.unwrap();
        let districts: Vec<_> = rows.iter().map(|r| r["parol_daerah"].clone()).collect();
        assert_eq!(districts, vec![json!("Gombak"), json!("Jasin")]);
    }

    #[tokio::test]
    async fn join_filter_goes_through_allowed_relations() {
        let (pool, _dir) = create_test_db().await;
        let gombak = create_mentor(&pool, "G", "g@example.com", "Gombak").await;
        let kuantan = create_mentor(&pool, "K", "k@example.com", "Kuantan").await;
        let a = create_mentee(&pool, "A", "a@example.com", "P-1", Some(gombak.id)).await;
        let b = create_mentee(&pool, "B", "b@example.com", "P-2", Some(kuantan.id)).await;
        create_laporan(&pool, a.id, Some(gombak.id), "2024-03-01 09:00:00").await;
        create_laporan(&pool, b.id, Some(kuantan.id), "2024-03-02 09:00:00").await;

        let query = parse_query("filters[mentor.parol_daerah]=Gombak&with[]=mentor:parol_daerah&with[]=csi");
        let rows = list_join_filtered(&pool, "laporan", &query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["mentee_id"], json!(a.id));
        assert_eq!(rows[0]["mentor"], json!({"user_id": gombak.id, "parol_daerah": "Gombak"}));
        assert!(!rows[0].contains_key("csi"));

        let query = parse_query("filters[mentor.parol_daerah]=!=Gombak");
        let rows = list_join_filtered(&pool, "laporan", &query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["mentee_id"], json!(b.id));
        assert!(rows[0].contains_key("mentee_account"));

        let query = parse_query("from=2024-03-02&to=2024-03-02");
        let rows = list_join_filtered(&pool, "laporan", &query).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn form_show_combines_primary_and_related_rows() {
        let (pool, _dir) = create_test_db().await;
        let mentor = create_mentor(&pool, "Mentor", "m@example.com", "Gombak").await;

        let data = show(&pool, "form-mentors", mentor.id).await.unwrap();
        assert_eq!(data["data"]["users"]["email"], json!("m@example.com"));
        assert!(data["data"]["users"].get("password").is_none());
        assert_eq!(data["data"]["mentors"]["parol_daerah"], json!("Gombak"));

        let err = show(&pool, "form-mentors", 999).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(ref msg) if msg == "Primary record not found."));

        let data = show(&pool, "users", mentor.id).await.unwrap();
        assert_eq!(data["data"]["name"], json!("Mentor"));

        let err = show(&pool, "widgets", 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(ref msg) if msg == "Model not found."));
    }
}
