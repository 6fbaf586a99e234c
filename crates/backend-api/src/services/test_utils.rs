//! Test utilities for service layer testing

use retrack_auth::{Authenticator, NewUser, User, UserRole};
use retrack_config::{AuthConfig, DatabaseConfig};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Creates a migrated test database
pub async fn create_test_db() -> (SqlitePool, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let config = DatabaseConfig {
        url: format!("sqlite://{}", db_path.display()),
        max_connections: 2,
    };

    let pool = retrack_database::initialize_database(&config)
        .await
        .expect("Failed to create test database");

    (pool, temp_dir)
}

pub fn authenticator(pool: &SqlitePool) -> Authenticator {
    Authenticator::new(
        pool.clone(),
        AuthConfig {
            session_ttl_seconds: 3_600,
        },
    )
}

/// Creates a user with password `secret`
pub async fn create_user(pool: &SqlitePool, name: &str, email: &str, role: UserRole) -> User {
    authenticator(pool)
        .create_user(&NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password: "secret".to_string(),
            role,
        })
        .await
        .expect("Failed to create user")
}

/// Creates a mentor user with a `mentors` profile in `district`
pub async fn create_mentor(pool: &SqlitePool, name: &str, email: &str, district: &str) -> User {
    let user = create_user(pool, name, email, UserRole::Mentor).await;
    sqlx::query("INSERT INTO mentors (user_id, nama_penuh, pangkat, parol_daerah) VALUES (?, ?, 'SARJAN', ?)")
        .bind(user.id)
        .bind(name)
        .bind(district)
        .execute(pool)
        .await
        .expect("Failed to create mentor profile");
    user
}

/// Creates an admin user with an `admins` profile in `district`
pub async fn create_admin(pool: &SqlitePool, name: &str, email: &str, district: Option<&str>) -> User {
    let user = create_user(pool, name, email, UserRole::Admin).await;
    sqlx::query("INSERT INTO admins (user_id, nama_penuh, pangkat, parol_daerah) VALUES (?, ?, 'INSPEKTOR', ?)")
        .bind(user.id)
        .bind(name)
        .bind(district)
        .execute(pool)
        .await
        .expect("Failed to create admin profile");
    user
}

/// Creates a mentee user with a `mentees` profile assigned to `mentor_id`
pub async fn create_mentee(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    id_prospek: &str,
    mentor_id: Option<i64>,
) -> User {
    let user = create_user(pool, name, email, UserRole::Mentee).await;
    sqlx::query("INSERT INTO mentees (user_id, id_prospek, mentor_id, daerah) VALUES (?, ?, ?, 'Gombak')")
        .bind(user.id)
        .bind(id_prospek)
        .bind(mentor_id)
        .execute(pool)
        .await
        .expect("Failed to create mentee profile");
    user
}

/// Inserts a laporan row with an explicit `created_at`
pub async fn create_laporan(
    pool: &SqlitePool,
    mentee_id: i64,
    mentor_id: Option<i64>,
    created_at: &str,
) -> i64 {
    sqlx::query(
        "INSERT INTO laporan (alamat, tujuan, mentor_id, mentee_id, created_at, updated_at) VALUES ('Jalan 1', 'Kerja', ?, ?, ?, ?)",
    )
    .bind(mentor_id)
    .bind(mentee_id)
    .bind(created_at)
    .bind(created_at)
    .execute(pool)
    .await
    .expect("Failed to create laporan")
    .last_insert_rowid()
}

pub async fn notification_count(pool: &SqlitePool, user_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("Failed to count notifications")
}
