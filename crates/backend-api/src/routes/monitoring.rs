use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    services::monitoring::{self as monitoring_service, OverdueMentee},
    util::require_bearer,
    ApiError, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct LateSubmissionsResponse {
    pub data: Vec<OverdueMentee>,
}

#[utoipa::path(
    get,
    path = "/api/listing-late-submissions",
    tag = "Monitoring",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Overdue mentees visible to the caller", body = LateSubmissionsResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Mentees cannot list late submissions", body = crate::error::ErrorResponse)
    )
)]
pub async fn late_submissions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LateSubmissionsResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let data =
        monitoring_service::late_submissions(state.db_pool(), state.monitoring(), &user, Utc::now()).await?;
    Ok(Json(LateSubmissionsResponse { data }))
}

#[utoipa::path(
    get,
    path = "/api/listing-late-submissions-mentor",
    tag = "Monitoring",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "The mentor's overdue mentees", body = LateSubmissionsResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Caller is not a mentor", body = crate::error::ErrorResponse)
    )
)]
pub async fn late_submissions_for_mentor(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LateSubmissionsResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let data =
        monitoring_service::late_submissions_for_mentor(state.db_pool(), state.monitoring(), &user, Utc::now())
            .await?;
    Ok(Json(LateSubmissionsResponse { data }))
}
