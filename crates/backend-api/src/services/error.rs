use axum::http::StatusCode;
use retrack_auth::AuthError;
use retrack_database::DatabaseError;
use thiserror::Error;

use crate::ApiError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    /// Form rule rejection, reported as 400 `{message}`.
    #[error("{0}")]
    Invalid(String),
    /// Form rule conflict, reported as 422 `{message}`.
    #[error("{0}")]
    Unprocessable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Internal(String),
    /// Failure inside a form transaction, reported as `{error, details}`.
    #[error("{error}: {details}")]
    Failed { error: String, details: String },
}

impl ServiceError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::Unprocessable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn failed(error: impl Into<String>, details: impl ToString) -> Self {
        Self::Failed {
            error: error.into(),
            details: details.to_string(),
        }
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::QueryError(inner) => Self::Database(inner),
            DatabaseError::InvalidIdentifier(name) => Self::BadRequest(format!("Invalid identifier: {name}")),
            DatabaseError::NotFound(what) => Self::NotFound(what),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(msg) => ApiError::not_found(msg),
            ServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            ServiceError::BadRequest(msg) => ApiError::bad_request(msg),
            ServiceError::Invalid(msg) => ApiError::rejected(StatusCode::BAD_REQUEST, msg),
            ServiceError::Unprocessable(msg) => ApiError::rejected(StatusCode::UNPROCESSABLE_ENTITY, msg),
            ServiceError::Database(db_err) => {
                tracing::error!("Database error: {}", db_err);
                ApiError::internal_server_error("Database operation failed")
            }
            ServiceError::Auth(auth_err) => ApiError::from(auth_err),
            ServiceError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ApiError::internal_server_error(msg)
            }
            ServiceError::Failed { error, details } => {
                tracing::error!(%details, "{}", error);
                ApiError::internal_server_error(error).with_details(details)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorEnvelope;
    use axum::body::to_bytes;
    use axum::response::IntoResponse;
    use serde_json::{json, Value};

    #[test]
    fn status_codes_follow_variant() {
        let cases = [
            (ServiceError::not_found("x"), StatusCode::NOT_FOUND),
            (ServiceError::forbidden("x"), StatusCode::FORBIDDEN),
            (ServiceError::bad_request("x"), StatusCode::BAD_REQUEST),
            (ServiceError::invalid("x"), StatusCode::BAD_REQUEST),
            (ServiceError::unprocessable("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (ServiceError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
            (ServiceError::Auth(AuthError::SessionExpired), StatusCode::UNAUTHORIZED),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[tokio::test]
    async fn form_rule_rejections_render_a_message_body() {
        let api = ApiError::from(ServiceError::unprocessable("Maaf, email tersebut sudah digunakan."));
        assert_eq!(api.envelope, ErrorEnvelope::Message);
        let response = api.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"message": "Maaf, email tersebut sudah digunakan."}));

        let api = ApiError::from(ServiceError::bad_request("Form relation not defined."));
        assert_eq!(api.envelope, ErrorEnvelope::Error);
        let bytes = to_bytes(api.into_response().into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"error": "Form relation not defined."}));
    }

    #[test]
    fn failed_keeps_details() {
        let api = ApiError::from(ServiceError::failed("Submission failed", "boom"));
        assert_eq!(api.message, "Submission failed");
        assert_eq!(api.details.as_deref(), Some("boom"));
    }

    #[test]
    fn invalid_identifiers_are_client_errors() {
        let err = ServiceError::from(DatabaseError::InvalidIdentifier("a b".into()));
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }
}
