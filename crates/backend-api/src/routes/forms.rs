use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::Value;

use crate::{
    routes::auth::MessageResponse,
    services::forms as form_service,
    util::{parse_record_id, require_bearer},
    ApiError, AppState,
};

#[utoipa::path(
    post,
    path = "/api/form-submit/{form_name}",
    tag = "Forms",
    security(("bearerAuth" = [])),
    params(("form_name" = String, Path, description = "Configured form name")),
    request_body(content = serde_json::Value, description = "`{primary_table: {...}, related_table: {...}}`"),
    responses(
        (status = 200, description = "Rows created", body = MessageResponse),
        (status = 400, description = "Form not configured or payload incomplete; rule rejections use MessageResponse", body = crate::error::ErrorResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Table not allowed", body = crate::error::ErrorResponse),
        (status = 422, description = "Validation rule violated", body = MessageResponse),
        (status = 500, description = "Submission failed", body = crate::error::ErrorResponse)
    )
)]
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(form_name): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<MessageResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    form_service::submit(state.db_pool(), &user, &form_name, payload).await?;

    Ok(Json(MessageResponse::new("Data submitted successfully")))
}

#[utoipa::path(
    put,
    path = "/api/form-submit/{form_name}/{id}",
    tag = "Forms",
    security(("bearerAuth" = [])),
    params(
        ("form_name" = String, Path, description = "Configured form name"),
        ("id" = i64, Path, description = "Primary record id")
    ),
    request_body(content = serde_json::Value, description = "Nested `{table: {...}}` or flat `table[field]` keys"),
    responses(
        (status = 200, description = "Rows updated", body = MessageResponse),
        (status = 400, description = "Form not configured or payload incomplete; rule rejections use MessageResponse", body = crate::error::ErrorResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Table not allowed", body = crate::error::ErrorResponse),
        (status = 404, description = "Record not found", body = crate::error::ErrorResponse),
        (status = 422, description = "Validation rule violated", body = MessageResponse),
        (status = 500, description = "Update failed", body = crate::error::ErrorResponse)
    )
)]
pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((form_name, id)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Result<Json<MessageResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let id = parse_record_id(&id).ok_or_else(|| ApiError::not_found("Invalid ID"))?;
    form_service::update(state.db_pool(), &user, &form_name, id, payload).await?;

    Ok(Json(MessageResponse::new("Data updated successfully.")))
}
