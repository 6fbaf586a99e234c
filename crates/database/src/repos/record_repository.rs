//! Generic row access for tables whose shape is resolved at runtime.
//!
//! Every function takes a connection so callers can run it on a pooled
//! connection or inside an open transaction (`&mut *tx`).

use serde_json::Value;
use sqlx::SqliteConnection;

use crate::codec::{bind_value, bind_values, row_to_record, Record};
use crate::schema::quote_ident;
use crate::types::{DatabaseError, DatabaseResult};

pub struct RecordRepository;

impl RecordRepository {
    /// First row of `table` whose `column` equals `value`.
    pub async fn find_by(
        conn: &mut SqliteConnection,
        table: &str,
        column: &str,
        value: &Value,
    ) -> DatabaseResult<Option<Record>> {
        Self::first_where(conn, table, &[(column, value.clone())]).await
    }

    /// First row matching every `(column, value)` pair. A null value matches `IS NULL`.
    pub async fn first_where(
        conn: &mut SqliteConnection,
        table: &str,
        conditions: &[(&str, Value)],
    ) -> DatabaseResult<Option<Record>> {
        let mut clauses = Vec::with_capacity(conditions.len());
        let mut params = Vec::with_capacity(conditions.len());
        for (column, value) in conditions {
            let quoted = quote_ident(column)?;
            if value.is_null() {
                clauses.push(format!("{quoted} IS NULL"));
            } else {
                clauses.push(format!("{quoted} = ?"));
                params.push(value.clone());
            }
        }

        let mut sql = format!("SELECT * FROM {}", quote_ident(table)?);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" LIMIT 1");

        let row = bind_values(sqlx::query(&sql), &params)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.as_ref().map(row_to_record).transpose()?)
    }

    /// Insert `values` into `table`, returning the new rowid.
    pub async fn insert(conn: &mut SqliteConnection, table: &str, values: &Record) -> DatabaseResult<i64> {
        if values.is_empty() {
            let sql = format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table)?);
            let result = sqlx::query(&sql).execute(&mut *conn).await?;
            return Ok(result.last_insert_rowid());
        }

        let columns = values
            .keys()
            .map(|column| quote_ident(column))
            .collect::<DatabaseResult<Vec<_>>>()?;
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table)?,
            columns.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for value in values.values() {
            query = bind_value(query, value);
        }
        let result = query.execute(&mut *conn).await?;
        Ok(result.last_insert_rowid())
    }

    /// Update the row of `table` where `key_column = key`. Returns affected rows.
    pub async fn update(
        conn: &mut SqliteConnection,
        table: &str,
        key_column: &str,
        key: &Value,
        values: &Record,
    ) -> DatabaseResult<u64> {
        if values.is_empty() {
            return Ok(0);
        }

        let assignments = values
            .keys()
            .map(|column| quote_ident(column).map(|quoted| format!("{quoted} = ?")))
            .collect::<DatabaseResult<Vec<_>>>()?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(table)?,
            assignments.join(", "),
            quote_ident(key_column)?
        );

        let mut query = sqlx::query(&sql);
        for value in values.values() {
            query = bind_value(query, value);
        }
        query = bind_value(query, key);

        let result = query.execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    /// Like [`find_by`](Self::find_by) but fails with `NotFound`.
    pub async fn get_by(
        conn: &mut SqliteConnection,
        table: &str,
        column: &str,
        value: &Value,
    ) -> DatabaseResult<Record> {
        Self::find_by(conn, table, column, value)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{table}.{column} = {value}")))
    }
}
