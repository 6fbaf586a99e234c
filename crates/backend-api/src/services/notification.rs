use retrack_auth::User;
use retrack_database::{Notification, NotificationRepository};
use serde_json::json;
use sqlx::SqlitePool;

use super::error::ServiceError;

pub const LATEST_LIMIT: i64 = 10;
pub const MAX_PER_PAGE: i64 = 50;

/// One page of the notification feed, newest first.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub items: Vec<Notification>,
    pub page: i64,
    pub per_page: i64,
    pub has_more: bool,
}

pub async fn latest(pool: &SqlitePool, user_id: i64) -> Result<Vec<Notification>, ServiceError> {
    let repo = NotificationRepository::new(pool.clone());
    Ok(repo.latest_for_user(user_id, LATEST_LIMIT).await?)
}

/// Clamp paging input: `per_page` to 1..=50, `page` to at least 1.
pub fn clamp_paging(page: Option<i64>, per_page: Option<i64>) -> (i64, i64) {
    let per_page = per_page.unwrap_or(LATEST_LIMIT).clamp(1, MAX_PER_PAGE);
    let page = page.unwrap_or(1).max(1);
    (page, per_page)
}

pub async fn feed(
    pool: &SqlitePool,
    user_id: i64,
    page: Option<i64>,
    per_page: Option<i64>,
) -> Result<FeedPage, ServiceError> {
    let (page, per_page) = clamp_paging(page, per_page);
    let repo = NotificationRepository::new(pool.clone());

    // One extra row tells whether another page exists.
    let mut items = repo
        .page_for_user(user_id, per_page + 1, (page - 1) * per_page)
        .await?;
    let has_more = items.len() as i64 > per_page;
    items.truncate(per_page as usize);

    Ok(FeedPage {
        items,
        page,
        per_page,
        has_more,
    })
}

pub async fn mark_read(pool: &SqlitePool, user_id: i64, notification_id: &str) -> Result<(), ServiceError> {
    let repo = NotificationRepository::new(pool.clone());
    if repo.mark_read(notification_id, user_id).await? {
        Ok(())
    } else {
        Err(ServiceError::not_found("Not found"))
    }
}

pub async fn send_test(pool: &SqlitePool, user: &User) -> Result<Notification, ServiceError> {
    let repo = NotificationRepository::new(pool.clone());
    let data = json!({
        "title": "Notifikasi Ujian",
        "message": "Ini adalah mesej ujian dari sistem.",
        "body": "Ini adalah mesej ujian dari sistem.",
        "url": format!("{}/dashboard", user.url_prefix()),
        "type": "test",
        "actor_id": user.id,
        "actor_name": user.name,
    });
    Ok(repo.create(user.id, "test", &data).await?)
}
