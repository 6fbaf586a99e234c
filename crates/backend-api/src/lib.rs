mod error;
mod state;
mod util;

pub mod docs;
pub mod query;
pub mod registry;
pub mod routes;
pub mod services;

pub use error::{ApiError, ErrorEnvelope, ErrorResponse};
pub use services::dedupe::DedupeCache;
pub use state::AppState;

use axum::{
    http::header::{AUTHORIZATION, CONTENT_TYPE},
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        // Auth
        .route("/api/login", post(routes::auth::login))
        .route("/api/logout", post(routes::auth::logout))
        .route("/api/me", get(routes::auth::me))
        .route("/api/user", get(routes::users::current_user))
        // Listing engine
        .route("/api/listing/:table", get(routes::listing::listing))
        .route(
            "/api/listing-filter/:table",
            get(routes::listing::listing_filter),
        )
        .route(
            "/api/listing-join-filter/:table",
            get(routes::listing::listing_join_filter),
        )
        .route(
            "/api/listing-late-submissions",
            get(routes::monitoring::late_submissions),
        )
        .route(
            "/api/listing-late-submissions-mentor",
            get(routes::monitoring::late_submissions_for_mentor),
        )
        // Form engine
        .route("/api/form-show/auth-user", get(routes::users::auth_user))
        .route(
            "/api/form-show/:form_name/:id",
            get(routes::listing::form_show),
        )
        .route("/api/form-submit/:form_name", post(routes::forms::submit))
        .route(
            "/api/form-submit/:form_name/:id",
            put(routes::forms::update),
        )
        // Notifications
        .route(
            "/api/notifications",
            get(routes::notifications::get_notifications),
        )
        .route(
            "/api/notifications-feed",
            get(routes::notifications::get_feed),
        )
        .route(
            "/api/notifications/:id/read",
            post(routes::notifications::mark_notification_read),
        )
        .route(
            "/api/test-notification",
            post(routes::notifications::send_test_notification),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", docs::ApiDoc::openapi()))
        .layer(cors_layer())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}
