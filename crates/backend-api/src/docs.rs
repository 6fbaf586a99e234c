use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::auth::login,
        crate::routes::auth::logout,
        crate::routes::auth::me,
        crate::routes::users::current_user,
        crate::routes::users::auth_user,
        crate::routes::listing::listing,
        crate::routes::listing::listing_filter,
        crate::routes::listing::listing_join_filter,
        crate::routes::listing::form_show,
        crate::routes::forms::submit,
        crate::routes::forms::update,
        crate::routes::notifications::get_notifications,
        crate::routes::notifications::get_feed,
        crate::routes::notifications::mark_notification_read,
        crate::routes::notifications::send_test_notification,
        crate::routes::monitoring::late_submissions,
        crate::routes::monitoring::late_submissions_for_mentor
    ),
    components(
        schemas(
            crate::error::ErrorResponse,
            crate::routes::health::HealthResponse,
            crate::routes::auth::LoginRequest,
            crate::routes::auth::LoginResponse,
            crate::routes::auth::UserResponse,
            crate::routes::auth::MeResponse,
            crate::routes::auth::MessageResponse,
            crate::routes::users::AuthUserData,
            crate::routes::users::AuthUserResponse,
            crate::routes::listing::ListingResponse,
            crate::routes::notifications::NotificationItem,
            crate::routes::notifications::FeedItem,
            crate::routes::notifications::FeedMeta,
            crate::routes::notifications::FeedResponse,
            crate::routes::notifications::MarkReadResponse,
            crate::routes::monitoring::LateSubmissionsResponse,
            crate::services::monitoring::OverdueMentee
        )
    ),
    tags(
        (name = "Health", description = "Service health endpoints"),
        (name = "Auth", description = "Password login and token sessions"),
        (name = "Users", description = "Authenticated user and role profile"),
        (name = "Listing", description = "Whitelisted table listings with relations and filters"),
        (name = "Forms", description = "Config-driven form show, submit and update"),
        (name = "Notifications", description = "User notifications and feed"),
        (name = "Monitoring", description = "Late laporan submissions")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        let schemes = &mut components.security_schemes;

        let mut scheme = SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer));
        if let SecurityScheme::Http(http) = &mut scheme {
            http.bearer_format = Some("Bearer".to_string());
        }

        schemes.insert("bearerAuth".to_string(), scheme);
    }
}
