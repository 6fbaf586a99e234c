use axum::{
    extract::{Path, RawQuery, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::{
    query::parse_query,
    services::{listing as listing_service, ServiceError},
    util::{parse_record_id, require_bearer},
    ApiError, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct ListingResponse {
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<Value>,
}

/// Unexpected listing failures keep their cause in the message.
fn fetch_error(err: ServiceError) -> ApiError {
    match err {
        ServiceError::Database(_) | ServiceError::Internal(_) => {
            tracing::error!(error = %err, "listing query failed");
            ApiError::internal_server_error(format!("Error fetching data: {err}"))
        }
        other => ApiError::from(other),
    }
}

fn into_response(records: Vec<retrack_database::Record>) -> Json<ListingResponse> {
    Json(ListingResponse {
        data: records.into_iter().map(Value::Object).collect(),
    })
}

#[utoipa::path(
    get,
    path = "/api/listing/{table}",
    tag = "Listing",
    security(("bearerAuth" = [])),
    params(
        ("table" = String, Path, description = "Whitelisted table name"),
        ("columns" = Option<String>, Query, description = "Comma separated column list"),
        ("order_by" = Option<String>, Query, description = "Column to order by"),
        ("order_dir" = Option<String>, Query, description = "asc or desc")
    ),
    responses(
        (status = 200, description = "Rows with default relations", body = ListingResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Table not allowed", body = crate::error::ErrorResponse),
        (status = 404, description = "Model not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(table): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Json<ListingResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    state.authenticate(&token).await?;

    let query = parse_query(raw.as_deref().unwrap_or_default());
    let records = listing_service::list(state.db_pool(), &table, &query)
        .await
        .map_err(fetch_error)?;

    Ok(into_response(records))
}

#[utoipa::path(
    get,
    path = "/api/listing-filter/{table}",
    tag = "Listing",
    security(("bearerAuth" = [])),
    params(
        ("table" = String, Path, description = "Whitelisted table name"),
        ("columns" = Option<String>, Query, description = "Comma separated column list"),
        ("filters" = Option<String>, Query, description = "filters[col]=v or filters[col][]=v")
    ),
    responses(
        (status = 200, description = "Filtered rows", body = ListingResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Table not allowed", body = crate::error::ErrorResponse),
        (status = 404, description = "Model not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn listing_filter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(table): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Json<ListingResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    state.authenticate(&token).await?;

    let query = parse_query(raw.as_deref().unwrap_or_default());
    let records = listing_service::list_filtered(state.db_pool(), &table, &query)
        .await
        .map_err(fetch_error)?;

    Ok(into_response(records))
}

#[utoipa::path(
    get,
    path = "/api/listing-join-filter/{table}",
    tag = "Listing",
    security(("bearerAuth" = [])),
    params(
        ("table" = String, Path, description = "Whitelisted table name"),
        ("with" = Option<Vec<String>>, Query, description = "with[]=relation or with[]=relation:c1,c2"),
        ("filters" = Option<String>, Query, description = "filters[col] or filters[relation.col]"),
        ("from" = Option<String>, Query, description = "Earliest date(updated_at)"),
        ("to" = Option<String>, Query, description = "Latest date(updated_at)"),
        ("sort" = Option<String>, Query, description = "Column to order by"),
        ("order" = Option<String>, Query, description = "asc or desc")
    ),
    responses(
        (status = 200, description = "Rows with requested relations", body = ListingResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Table not allowed", body = crate::error::ErrorResponse),
        (status = 404, description = "Model not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn listing_join_filter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(table): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Json<ListingResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    state.authenticate(&token).await?;

    let query = parse_query(raw.as_deref().unwrap_or_default());
    let records = listing_service::list_join_filtered(state.db_pool(), &table, &query)
        .await
        .map_err(fetch_error)?;

    Ok(into_response(records))
}

#[utoipa::path(
    get,
    path = "/api/form-show/{form_name}/{id}",
    tag = "Forms",
    security(("bearerAuth" = [])),
    params(
        ("form_name" = String, Path, description = "Form name, or a table name when no form is configured"),
        ("id" = i64, Path, description = "Primary record id")
    ),
    responses(
        (status = 200, description = "Primary and related rows under `data`", body = serde_json::Value),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "Table not allowed", body = crate::error::ErrorResponse),
        (status = 404, description = "Record not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn form_show(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((form_name, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let token = require_bearer(&headers)?;
    state.authenticate(&token).await?;

    let id = parse_record_id(&id).ok_or_else(|| ApiError::not_found("Invalid ID"))?;
    let data = listing_service::show(state.db_pool(), &form_name, id).await?;

    Ok(Json(data))
}
