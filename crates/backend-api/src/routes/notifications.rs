use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::SecondsFormat;
use retrack_database::{clock::parse_timestamp, Notification};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::{IntoParams, ToSchema};

use crate::{
    routes::auth::MessageResponse,
    services::{notification as notification_service, ServiceError},
    util::require_bearer,
    ApiError, AppState,
};

/// A stored notification as kept in the `notifications` table.
#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationItem {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    #[schema(value_type = Object)]
    pub data: Value,
    pub read_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Notification> for NotificationItem {
    fn from(value: Notification) -> Self {
        Self {
            id: value.id,
            notification_type: value.notification_type,
            data: value.data,
            read_at: value.read_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub body: String,
    pub actor_name: Option<String>,
    pub url: Option<String>,
    pub created_at: String,
    pub read_at: Option<String>,
}

fn rfc3339(stored: &str) -> String {
    parse_timestamp(stored)
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .unwrap_or_else(|| stored.to_string())
}

impl From<Notification> for FeedItem {
    fn from(value: Notification) -> Self {
        Self {
            title: value.title().unwrap_or("Notifikasi").to_string(),
            body: value.body().unwrap_or_default().to_string(),
            actor_name: value.actor_name().map(str::to_string),
            url: value.url().map(str::to_string),
            created_at: rfc3339(&value.created_at),
            read_at: value.read_at.as_deref().map(rfc3339),
            id: value.id,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeedMeta {
    pub current_page: i64,
    pub per_page: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeedResponse {
    pub data: Vec<FeedItem>,
    pub meta: FeedMeta,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct FeedQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkReadResponse {
    pub success: bool,
}

#[utoipa::path(
    get,
    path = "/api/notifications",
    tag = "Notifications",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Latest ten notifications", body = Vec<NotificationItem>),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<NotificationItem>>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let notifications = notification_service::latest(state.db_pool(), user.id).await?;
    Ok(Json(notifications.into_iter().map(NotificationItem::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/notifications-feed",
    tag = "Notifications",
    security(("bearerAuth" = [])),
    params(FeedQuery),
    responses(
        (status = 200, description = "Paged notification feed", body = FeedResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let page = notification_service::feed(state.db_pool(), user.id, query.page, query.per_page).await?;
    Ok(Json(FeedResponse {
        data: page.items.into_iter().map(FeedItem::from).collect(),
        meta: FeedMeta {
            current_page: page.page,
            per_page: page.per_page,
            has_more: page.has_more,
        },
    }))
}

#[utoipa::path(
    post,
    path = "/api/notifications/{id}/read",
    tag = "Notifications",
    security(("bearerAuth" = [])),
    params(("id" = String, Path, description = "Notification uuid")),
    responses(
        (status = 200, description = "Marked as read", body = MarkReadResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 404, description = "Not the caller's notification", body = MessageResponse)
    )
)]
pub async fn mark_notification_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    match notification_service::mark_read(state.db_pool(), user.id, &id).await {
        Ok(()) => Ok(Json(MarkReadResponse { success: true }).into_response()),
        Err(ServiceError::NotFound(_)) => {
            Ok((StatusCode::NOT_FOUND, Json(json!({"message": "Not found"}))).into_response())
        }
        Err(err) => Err(err.into()),
    }
}

#[utoipa::path(
    post,
    path = "/api/test-notification",
    tag = "Notifications",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Test notification stored", body = MessageResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn send_test_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    notification_service::send_test(state.db_pool(), &user).await?;
    Ok(Json(MessageResponse::new("Notifikasi dihantar")))
}
