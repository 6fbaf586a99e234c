//! Schema introspection and identifier handling for dynamic tables.

use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::types::{DatabaseError, DatabaseResult};

const MAX_IDENTIFIER_LEN: usize = 64;

/// Whether `name` is safe to interpolate into SQL as a table or column name.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn ensure_identifier(name: &str) -> DatabaseResult<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(DatabaseError::InvalidIdentifier(name.to_string()))
    }
}

/// Double-quote a validated identifier.
pub fn quote_ident(name: &str) -> DatabaseResult<String> {
    ensure_identifier(name)?;
    Ok(format!("\"{name}\""))
}

/// Column names of `table` in declaration order. Unknown tables yield an empty list.
pub async fn table_columns(pool: &SqlitePool, table: &str) -> DatabaseResult<Vec<String>> {
    let mut conn = pool.acquire().await?;
    table_columns_on(&mut conn, table).await
}

pub async fn table_columns_on(conn: &mut SqliteConnection, table: &str) -> DatabaseResult<Vec<String>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table)?);
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

    rows.iter()
        .map(|row| row.try_get::<String, _>("name").map_err(DatabaseError::from))
        .collect()
}

pub async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> DatabaseResult<bool> {
    Ok(table_columns(pool, table).await?.iter().any(|c| c == column))
}
