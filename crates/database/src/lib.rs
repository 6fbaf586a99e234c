//! Retrack Database Crate
//!
//! Connection management, embedded migrations, the dynamic row codec used by
//! the CRUD engine, and repositories for the engine configuration tables.

use retrack_config::DatabaseConfig;
use sqlx::SqlitePool;

pub mod clock;
pub mod codec;
pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repos;
pub mod schema;
pub mod types;

pub use codec::{bind_value, bind_values, row_to_record, rows_to_records, Record};
pub use connection::prepare_database;
pub use migrations::{run_migrations, MIGRATOR};

pub use repos::{CacheRepository, EngineRepository, NotificationRepository, RecordRepository};

pub use entities::{
    NewFormUpdateLog, Notification, NotificationRule, PayloadTemplate, TablePermission, TableRelation,
    WorkflowRule,
};

pub use types::{DatabaseError, DatabaseResult};

/// Initialize the database with migrations
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

    run_migrations(&pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("{e:#}")))?;

    Ok(pool)
}
