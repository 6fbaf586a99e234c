//! Daily laporan reminders and the late-submission listings.
//!
//! Batches run once per UTC day per recipient. Markers go through the
//! [`DedupeCache`] and expire at the next midnight.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use retrack_auth::{Authenticator, User, UserRole};
use retrack_config::MonitoringConfig;
use retrack_database::clock::{format_date, format_timestamp, parse_timestamp};
use retrack_database::NotificationRepository;
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, info};
use utoipa::ToSchema;

use super::dedupe::{end_of_day, DedupeCache};
use super::error::ServiceError;
use super::fanout::admins_for_district;

const MISSING_TITLE: &str = "Laporan Mentee Belum Dihantar";

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow, ToSchema)]
pub struct OverdueMentee {
    pub user_id: i64,
    pub name: String,
    pub id_prospek: String,
    pub mentor_id: Option<i64>,
    pub mentor_name: Option<String>,
    pub parol_daerah: Option<String>,
    pub last_laporan_at: Option<String>,
    #[sqlx(skip)]
    pub hours_since: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverdueScope {
    All,
    District(String),
    Mentor(i64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct MissingReport {
    pub mentors: usize,
    pub admins: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct PruneReport {
    pub sessions: u64,
    pub markers: u64,
}

/// Malay relative phrase for the time elapsed since `then`.
pub fn relative_phrase(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds().max(1);
    let (amount, unit) = match seconds {
        s if s < 60 => (s, "saat"),
        s if s < 3_600 => (s / 60, "minit"),
        s if s < 86_400 => (s / 3_600, "jam"),
        s if s < 7 * 86_400 => (s / 86_400, "hari"),
        s if s < 30 * 86_400 => (s / (7 * 86_400), "minggu"),
        s if s < 365 * 86_400 => (s / (30 * 86_400), "bulan"),
        s => (s / (365 * 86_400), "tahun"),
    };
    format!("{amount} {unit} yang lalu")
}

/// Mentees whose latest laporan is older than `hours`, or who never sent one.
pub async fn overdue_mentees(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    hours: i64,
    scope: &OverdueScope,
) -> Result<Vec<OverdueMentee>, ServiceError> {
    let cutoff = format_timestamp(now - Duration::hours(hours));

    let mut sql = String::from(
        r#"
        SELECT m.user_id AS user_id, u.name AS name, m.id_prospek AS id_prospek,
               m.mentor_id AS mentor_id, mu.name AS mentor_name,
               (SELECT parol_daerah FROM mentors WHERE user_id = m.mentor_id LIMIT 1) AS parol_daerah,
               last.last_at AS last_laporan_at
        FROM mentees m
        JOIN users u ON u.id = m.user_id
        LEFT JOIN (SELECT mentee_id, MAX(created_at) AS last_at FROM laporan GROUP BY mentee_id) last
            ON last.mentee_id = m.user_id
        LEFT JOIN users mu ON mu.id = m.mentor_id
        WHERE (last.last_at IS NULL OR last.last_at < ?)
        "#,
    );
    match scope {
        OverdueScope::All => {}
        OverdueScope::District(_) => {
            sql.push_str(" AND m.mentor_id IN (SELECT user_id FROM mentors WHERE parol_daerah = ?)")
        }
        OverdueScope::Mentor(_) => sql.push_str(" AND m.mentor_id = ?"),
    }
    sql.push_str(" ORDER BY m.id");

    let mut query = sqlx::query_as::<_, OverdueMentee>(&sql).bind(cutoff);
    query = match scope {
        OverdueScope::All => query,
        OverdueScope::District(district) => query.bind(district.clone()),
        OverdueScope::Mentor(mentor_id) => query.bind(*mentor_id),
    };

    let mut rows = query.fetch_all(pool).await?;
    for row in &mut rows {
        row.hours_since = row
            .last_laporan_at
            .as_deref()
            .and_then(parse_timestamp)
            .map(|last| (now - last).num_hours());
    }
    Ok(rows)
}

/// `notify-overdue`: remind overdue mentees. Returns the number sent.
pub async fn notify_overdue(
    pool: &SqlitePool,
    dedupe: &DedupeCache,
    config: &MonitoringConfig,
    now: DateTime<Utc>,
) -> Result<usize, ServiceError> {
    let rows = overdue_mentees(pool, now, config.overdue_hours, &OverdueScope::All).await?;
    let repo = NotificationRepository::new(pool.clone());
    let date = format_date(now.date_naive());
    let expires_at = end_of_day(now);

    let mut sent = 0;
    for row in rows {
        let key = format!("overdue48h:{}:{date}", row.user_id);
        if !dedupe.claim(&key, now, expires_at).await? {
            debug!(user_id = row.user_id, "overdue reminder already sent today");
            continue;
        }

        let body = match row.last_laporan_at.as_deref().and_then(parse_timestamp) {
            Some(last) => format!("Anda belum hantar laporan sejak {}.", relative_phrase(last, now)),
            None => "Anda belum pernah hantar laporan. Sila hantar laporan pertama.".to_string(),
        };
        let data = json!({
            "title": "Ingatkan Laporan",
            "message": body,
            "body": body,
            "url": config.mentee_dashboard_url,
            "type": "laporan_overdue_48h",
        });
        repo.create(row.user_id, "laporan_overdue_48h", &data).await?;
        sent += 1;
    }

    info!(sent, "overdue laporan reminders sent");
    Ok(sent)
}

#[derive(Debug, sqlx::FromRow)]
struct MissingByMentor {
    mentor_id: i64,
    district: Option<String>,
    missing: i64,
}

/// `notify-missing`: tell mentors, then district admins, how many mentees have not reported today.
pub async fn notify_missing(
    pool: &SqlitePool,
    dedupe: &DedupeCache,
    config: &MonitoringConfig,
    now: DateTime<Utc>,
) -> Result<MissingReport, ServiceError> {
    let date = format_date(now.date_naive());
    let expires_at = end_of_day(now);

    let by_mentor = sqlx::query_as::<_, MissingByMentor>(
        r#"
        SELECT m.mentor_id AS mentor_id,
               (SELECT parol_daerah FROM mentors WHERE user_id = m.mentor_id LIMIT 1) AS district,
               COUNT(*) AS missing
        FROM mentees m
        JOIN users mu ON mu.id = m.mentor_id
        WHERE m.mentor_id IS NOT NULL
          AND m.user_id NOT IN (SELECT mentee_id FROM laporan WHERE date(created_at) = ?)
        GROUP BY m.mentor_id
        ORDER BY m.mentor_id
        "#,
    )
    .bind(&date)
    .fetch_all(pool)
    .await?;

    let mut report = MissingReport::default();
    if by_mentor.is_empty() {
        info!("every mentee has reported today");
        return Ok(report);
    }

    let repo = NotificationRepository::new(pool.clone());
    for row in &by_mentor {
        let key = format!("laporan:notify:mentor:{}:{date}", row.mentor_id);
        if !dedupe.claim(&key, now, expires_at).await? {
            continue;
        }
        let message = format!("Terdapat {} mentee belum hantar laporan hari ini.", row.missing);
        let data = json!({
            "title": MISSING_TITLE,
            "message": message,
            "body": message,
            "url": config.mentor_late_url,
            "type": "laporan_missing_mentor",
        });
        repo.create(row.mentor_id, "laporan_missing_mentor", &data).await?;
        report.mentors += 1;
        info!(mentor_id = row.mentor_id, missing = row.missing, "mentor notified about missing laporan");
    }

    let mut by_district: BTreeMap<&str, i64> = BTreeMap::new();
    for row in &by_mentor {
        if let Some(district) = row.district.as_deref().filter(|d| !d.trim().is_empty()) {
            *by_district.entry(district).or_default() += row.missing;
        }
    }

    for (district, total) in by_district {
        if total <= 0 {
            continue;
        }
        let message = format!("Terdapat {total} mentee belum hantar laporan hari ini.");
        for admin in admins_for_district(pool, Some(district)).await? {
            let key = format!("laporan:notify:admin:{}:{date}", admin.id);
            if !dedupe.claim(&key, now, expires_at).await? {
                continue;
            }
            let data = json!({
                "title": MISSING_TITLE,
                "message": message,
                "body": message,
                "url": config.admin_late_url,
                "type": "laporan_missing_admin",
            });
            repo.create(admin.id, "laporan_missing_admin", &data).await?;
            report.admins += 1;
            info!(admin_id = admin.id, district, total, "admin notified about missing laporan");
        }
    }

    Ok(report)
}

/// `prune-tokens`: drop expired sessions and stale dedupe markers.
pub async fn prune(
    authenticator: &Authenticator,
    dedupe: &DedupeCache,
    now: DateTime<Utc>,
) -> Result<PruneReport, ServiceError> {
    let sessions = authenticator.prune_expired_sessions().await?;
    let markers = dedupe.purge_expired(now).await;
    info!(sessions, markers, "expired sessions pruned");
    Ok(PruneReport { sessions, markers })
}

/// `GET /api/listing-late-submissions`
pub async fn late_submissions(
    pool: &SqlitePool,
    config: &MonitoringConfig,
    user: &User,
    now: DateTime<Utc>,
) -> Result<Vec<OverdueMentee>, ServiceError> {
    let scope = match user.role() {
        Some(UserRole::Mentor) => OverdueScope::Mentor(user.id),
        Some(role) if role.is_admin() || role == UserRole::Dev => {
            let district: Option<Option<String>> =
                sqlx::query_scalar("SELECT parol_daerah FROM admins WHERE user_id = ? LIMIT 1")
                    .bind(user.id)
                    .fetch_optional(pool)
                    .await?;
            match district.flatten().filter(|d| !d.trim().is_empty()) {
                Some(district) => OverdueScope::District(district),
                None => OverdueScope::All,
            }
        }
        _ => return Err(ServiceError::forbidden("Forbidden")),
    };
    overdue_mentees(pool, now, config.overdue_hours, &scope).await
}

/// `GET /api/listing-late-submissions-mentor`
pub async fn late_submissions_for_mentor(
    pool: &SqlitePool,
    config: &MonitoringConfig,
    user: &User,
    now: DateTime<Utc>,
) -> Result<Vec<OverdueMentee>, ServiceError> {
    if user.role() != Some(UserRole::Mentor) {
        return Err(ServiceError::forbidden("Forbidden"));
    }
    overdue_mentees(pool, now, config.overdue_hours, &OverdueScope::Mentor(user.id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_utils::{
        authenticator, create_admin, create_laporan, create_mentee, create_mentor, create_test_db, create_user,
        notification_count,
    };
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn dedupe(pool: &SqlitePool) -> DedupeCache {
        DedupeCache::database(pool.clone(), "test:")
    }

    #[test]
    fn relative_phrases() {
        let now = noon();
        assert_eq!(relative_phrase(now - Duration::hours(5), now), "5 jam yang lalu");
        assert_eq!(relative_phrase(now - Duration::days(2), now), "2 hari yang lalu");
        assert_eq!(relative_phrase(now - Duration::days(14), now), "2 minggu yang lalu");
        assert_eq!(relative_phrase(now - Duration::minutes(3), now), "3 minit yang lalu");
    }

    #[tokio::test]
    async fn overdue_reminders_are_sent_once_per_day() {
        let (pool, _dir) = create_test_db().await;
        let mentor = create_mentor(&pool, "Mentor", "mentor@example.com", "Gombak").await;
        let late = create_mentee(&pool, "Late", "late@example.com", "P-1", Some(mentor.id)).await;
        let never = create_mentee(&pool, "Never", "never@example.com", "P-2", Some(mentor.id)).await;
        let fresh = create_mentee(&pool, "Fresh", "fresh@example.com", "P-3", Some(mentor.id)).await;
        let now = Utc::now();
        let stale = format_timestamp(now - Duration::hours(50));
        let recent = format_timestamp(now - Duration::hours(1));
        create_laporan(&pool, late.id, Some(mentor.id), &stale).await;
        create_laporan(&pool, fresh.id, Some(mentor.id), &recent).await;

        let config = MonitoringConfig::default();
        let cache = dedupe(&pool);
        assert_eq!(notify_overdue(&pool, &cache, &config, now).await.unwrap(), 2);
        assert_eq!(notify_overdue(&pool, &cache, &config, now).await.unwrap(), 0);

        assert_eq!(notification_count(&pool, late.id).await, 1);
        assert_eq!(notification_count(&pool, never.id).await, 1);
        assert_eq!(notification_count(&pool, fresh.id).await, 0);

        let repo = NotificationRepository::new(pool.clone());
        let latest = repo.latest_for_user(late.id, 1).await.unwrap();
        assert_eq!(latest[0].body(), Some("Anda belum hantar laporan sejak 2 hari yang lalu."));
        assert_eq!(latest[0].url(), Some("/mentee/dashboard"));
    }

    #[tokio::test]
    async fn concurrent_overdue_runs_send_each_reminder_once() {
        let (pool, _dir) = create_test_db().await;
        let mentor = create_mentor(&pool, "Mentor", "mentor@example.com", "Gombak").await;
        let first = create_mentee(&pool, "First", "first@example.com", "P-1", Some(mentor.id)).await;
        let second = create_mentee(&pool, "Second", "second@example.com", "P-2", Some(mentor.id)).await;

        let config = MonitoringConfig::default();
        let cache = dedupe(&pool);
        let now = Utc::now();
        let (a, b) = tokio::join!(
            notify_overdue(&pool, &cache, &config, now),
            notify_overdue(&pool, &cache, &config, now),
        );
        assert_eq!(a.unwrap() + b.unwrap(), 2);
        assert_eq!(notification_count(&pool, first.id).await, 1);
        assert_eq!(notification_count(&pool, second.id).await, 1);
    }

    #[tokio::test]
    async fn missing_reports_reach_mentors_and_district_admins() {
        let (pool, _dir) = create_test_db().await;
        let gombak_mentor = create_mentor(&pool, "M1", "m1@example.com", "Gombak").await;
        let kuantan_mentor = create_mentor(&pool, "M2", "m2@example.com", "Kuantan").await;
        let admin = create_admin(&pool, "Admin", "admin@example.com", Some("Gombak")).await;
        let other_admin = create_admin(&pool, "Other", "other@example.com", Some("Ipoh")).await;

        let reported = create_mentee(&pool, "A", "a@example.com", "P-1", Some(gombak_mentor.id)).await;
        create_mentee(&pool, "B", "b@example.com", "P-2", Some(gombak_mentor.id)).await;
        create_mentee(&pool, "C", "c@example.com", "P-3", Some(gombak_mentor.id)).await;
        create_mentee(&pool, "D", "d@example.com", "P-4", Some(kuantan_mentor.id)).await;
        create_mentee(&pool, "E", "e@example.com", "P-5", None).await;
        let now = Utc::now();
        create_laporan(&pool, reported.id, Some(gombak_mentor.id), &format_timestamp(now)).await;

        let config = MonitoringConfig::default();
        let cache = dedupe(&pool);
        let report = notify_missing(&pool, &cache, &config, now).await.unwrap();
        assert_eq!(report, MissingReport { mentors: 2, admins: 1 });

        let repo = NotificationRepository::new(pool.clone());
        let mentor_note = repo.latest_for_user(gombak_mentor.id, 1).await.unwrap();
        assert_eq!(mentor_note[0].body(), Some("Terdapat 2 mentee belum hantar laporan hari ini."));
        let admin_note = repo.latest_for_user(admin.id, 1).await.unwrap();
        assert_eq!(admin_note[0].url(), Some("/admin/mentees-lambat-hantar"));
        assert_eq!(notification_count(&pool, other_admin.id).await, 0);

        let again = notify_missing(&pool, &cache, &config, now).await.unwrap();
        assert_eq!(again, MissingReport::default());
    }

    #[tokio::test]
    async fn late_listings_are_scoped_by_role() {
        let (pool, _dir) = create_test_db().await;
        let gombak = create_mentor(&pool, "M1", "m1@example.com", "Gombak").await;
        let kuantan = create_mentor(&pool, "M2", "m2@example.com", "Kuantan").await;
        let mentee = create_mentee(&pool, "A", "a@example.com", "P-1", Some(gombak.id)).await;
        create_mentee(&pool, "B", "b@example.com", "P-2", Some(kuantan.id)).await;
        create_laporan(&pool, mentee.id, Some(gombak.id), "2025-03-07 12:00:00").await;
        let admin = create_admin(&pool, "Admin", "admin@example.com", Some("Gombak")).await;
        let superadmin = create_user(&pool, "Root", "root@example.com", UserRole::Superadmin).await;

        let config = MonitoringConfig::default();
        let rows = late_submissions(&pool, &config, &admin, noon()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, mentee.id);
        assert_eq!(rows[0].mentor_name.as_deref(), Some("M1"));
        assert_eq!(rows[0].parol_daerah.as_deref(), Some("Gombak"));
        assert_eq!(rows[0].hours_since, Some(72));

        assert_eq!(late_submissions(&pool, &config, &superadmin, noon()).await.unwrap().len(), 2);
        assert_eq!(late_submissions(&pool, &config, &kuantan, noon()).await.unwrap().len(), 1);

        let err = late_submissions(&pool, &config, &mentee, noon()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        let err = late_submissions_for_mentor(&pool, &config, &admin, noon()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        let own = late_submissions_for_mentor(&pool, &config, &gombak, noon()).await.unwrap();
        assert_eq!(own.len(), 1);
    }

    #[tokio::test]
    async fn prune_reports_counts() {
        let (pool, _dir) = create_test_db().await;
        let cache = dedupe(&pool);
        cache.claim("old", noon() - Duration::days(2), noon() - Duration::days(1)).await.unwrap();

        let report = prune(&authenticator(&pool), &cache, noon()).await.unwrap();
        assert_eq!(report.markers, 1);
        assert_eq!(report.sessions, 0);
    }
}
