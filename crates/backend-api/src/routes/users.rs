use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::{
    routes::auth::UserResponse, services::users as user_service, util::require_bearer, ApiError, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthUserData {
    pub user: UserResponse,
    /// The caller's mentor, admin or mentee row.
    #[schema(value_type = Option<Object>)]
    pub profile: Option<Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthUserResponse {
    pub data: AuthUserData,
}

#[utoipa::path(
    get,
    path = "/api/user",
    tag = "Users",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Authenticated user", body = UserResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    Ok(Json(user.into()))
}

#[utoipa::path(
    get,
    path = "/api/form-show/auth-user",
    tag = "Users",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Authenticated user with role profile", body = AuthUserResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn auth_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AuthUserResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;
    let profile = user_service::profile(state.db_pool(), &user).await?;

    Ok(Json(AuthUserResponse {
        data: AuthUserData {
            user: user.into(),
            profile: profile.map(Value::Object),
        },
    }))
}
