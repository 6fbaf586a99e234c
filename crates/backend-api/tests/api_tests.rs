use std::str::FromStr;

use axum::{
    body::Body,
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
            ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, AUTHORIZATION, CONTENT_TYPE, ORIGIN,
        },
        Method, Request, StatusCode,
    },
    Router,
};
use http_body_util::BodyExt;
use retrack_auth::{Authenticator, NewUser, User, UserRole};
use retrack_backend_api::{build_router, AppState};
use retrack_config::AppConfig;
use serde_json::{json, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tempfile::TempDir;
use tower::ServiceExt;

type TestResult<T = ()> = anyhow::Result<T>;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

struct TestContext {
    _temp_dir: TempDir,
    pool: SqlitePool,
    state: AppState,
}

impl TestContext {
    async fn new() -> TestResult<Self> {
        let config = AppConfig::default();
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("backend_api.sqlite");
        let db_url = format!("sqlite://{}", db_path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;

        let authenticator = Authenticator::new(pool.clone(), config.auth.clone());
        let state = AppState::with_defaults(pool.clone(), authenticator);

        Ok(Self {
            _temp_dir: temp_dir,
            pool,
            state,
        })
    }

    fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    async fn create_user(&self, name: &str, email: &str, role: UserRole) -> TestResult<User> {
        Ok(self
            .state
            .authenticator()
            .create_user(&NewUser {
                name: name.to_string(),
                email: email.to_string(),
                password: "secret".to_string(),
                role,
            })
            .await?)
    }

    async fn create_mentor(&self, name: &str, email: &str, district: &str) -> TestResult<User> {
        let user = self.create_user(name, email, UserRole::Mentor).await?;
        sqlx::query("INSERT INTO mentors (user_id, nama_penuh, parol_daerah) VALUES (?, ?, ?)")
            .bind(user.id)
            .bind(name)
            .bind(district)
            .execute(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create_mentee(&self, name: &str, email: &str, mentor_id: i64) -> TestResult<User> {
        let user = self.create_user(name, email, UserRole::Mentee).await?;
        sqlx::query("INSERT INTO mentees (user_id, id_prospek, mentor_id) VALUES (?, ?, ?)")
            .bind(user.id)
            .bind(format!("P-{}", user.id))
            .bind(mentor_id)
            .execute(&self.pool)
            .await?;
        Ok(user)
    }

    async fn login(&self, email: &str) -> TestResult<String> {
        let (_, session) = self
            .state
            .authenticator()
            .login_with_password(email, "secret")
            .await?;
        Ok(session.token)
    }

    async fn send(&self, request: Request<Body>) -> TestResult<(StatusCode, Value)> {
        let response = self.router().oneshot(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        let payload = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body)?
        };
        Ok((status, payload))
    }

    async fn get(&self, uri: &str, token: &str) -> TestResult<(StatusCode, Value)> {
        self.send(
            Request::builder()
                .uri(uri)
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())?,
        )
        .await
    }

    async fn send_json(&self, method: Method, uri: &str, token: &str, body: Value) -> TestResult<(StatusCode, Value)> {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))?,
        )
        .await
    }
}

mod router_tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_ok() -> TestResult {
        let ctx = TestContext::new().await?;
        let (status, payload) = ctx
            .send(Request::builder().uri("/health").body(Body::empty())?)
            .await?;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "ok");
        assert!(payload["timestamp"].is_string());
        Ok(())
    }

    #[tokio::test]
    async fn openapi_document_is_served() -> TestResult {
        let ctx = TestContext::new().await?;
        let response = ctx
            .router()
            .oneshot(Request::builder().uri("/api-docs/openapi.json").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await?.to_bytes();
        let doc: Value = serde_json::from_slice(&body)?;
        assert!(doc["paths"]["/api/form-submit/{form_name}"].is_object());
        assert!(doc["components"]["securitySchemes"]["bearerAuth"].is_object());
        Ok(())
    }

    #[tokio::test]
    async fn cors_preflight_allows_auth_headers() -> TestResult {
        let ctx = TestContext::new().await?;
        let response = ctx
            .router()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/me")
                    .header(ORIGIN, "https://example.com")
                    .header(ACCESS_CONTROL_REQUEST_METHOD, "PUT")
                    .header(ACCESS_CONTROL_REQUEST_HEADERS, "authorization, content-type")
                    .body(Body::empty())?,
            )
            .await?;

        assert!(response.status().is_success());
        let headers = response.headers();
        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).and_then(|v| v.to_str().ok()),
            Some("*")
        );
        let methods = headers
            .get(ACCESS_CONTROL_ALLOW_METHODS)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(methods.contains("PUT"));
        let allowed = headers
            .get(ACCESS_CONTROL_ALLOW_HEADERS)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        assert!(allowed.contains("authorization"));
        assert!(allowed.contains("content-type"));
        Ok(())
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() -> TestResult {
        let ctx = TestContext::new().await?;
        for uri in ["/api/me", "/api/listing/laporan", "/api/notifications"] {
            let (status, payload) = ctx
                .send(Request::builder().uri(uri).body(Body::empty())?)
                .await?;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert!(payload["error"].is_string());
        }

        let (status, _) = ctx.get("/api/me", "not-a-token").await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        Ok(())
    }
}

mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn login_me_and_logout() -> TestResult {
        let ctx = TestContext::new().await?;
        ctx.create_mentor("Cikgu Ali", "ali@example.com", "Gombak").await?;

        let (status, payload) = ctx
            .send(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/login")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({"email": "ALI@example.com", "password": "secret"}).to_string()))?,
            )
            .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["token_type"], "Bearer");
        assert_eq!(payload["role"], "mentor");
        assert!(payload["user"].get("password").is_none());
        let token = payload["token"].as_str().unwrap_or_default().to_string();

        let (status, me) = ctx.get("/api/me", &token).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["user"]["name"], "Cikgu Ali");

        let (status, profile) = ctx.get("/api/form-show/auth-user", &token).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["data"]["profile"]["parol_daerah"], "Gombak");

        let (status, payload) = ctx.send_json(Method::POST, "/api/logout", &token, json!({})).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["message"], "Logged out");

        let (status, _) = ctx.get("/api/me", &token).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() -> TestResult {
        let ctx = TestContext::new().await?;
        ctx.create_user("Admin", "admin@example.com", UserRole::Admin).await?;

        let (status, payload) = ctx
            .send(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/login")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({"email": "admin@example.com", "password": "nope"}).to_string()))?,
            )
            .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(payload["error"].is_string());
        Ok(())
    }
}

mod engine_tests {
    use super::*;

    #[tokio::test]
    async fn submit_list_show_and_update_a_laporan() -> TestResult {
        let ctx = TestContext::new().await?;
        let mentor = ctx.create_mentor("Mentor", "mentor@example.com", "Gombak").await?;
        let mentee = ctx.create_mentee("Mentee", "mentee@example.com", mentor.id).await?;
        let token = ctx.login("mentee@example.com").await?;

        let body = json!({"laporan": {"mentee_id": mentee.id, "mentor_id": mentor.id, "alamat": "Jalan 1", "tujuan": "Kerja"}});
        let (status, payload) = ctx
            .send_json(Method::POST, "/api/form-submit/laporan-mentee", &token, body.clone())
            .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["message"], "Data submitted successfully");

        let (status, payload) = ctx
            .send_json(Method::POST, "/api/form-submit/laporan-mentee", &token, body)
            .await?;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(payload, json!({"message": "Maaf, anda hanya dibenarkan menghantar satu laporan sehari."}));

        let (status, listing) = ctx.get("/api/listing/laporan?columns=alamat", &token).await?;
        assert_eq!(status, StatusCode::OK);
        let rows = listing["data"].as_array().cloned().unwrap_or_default();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["alamat"], "Jalan 1");
        assert_eq!(rows[0]["mentee_account"]["name"], "Mentee");
        let id = rows[0]["id"].as_i64().unwrap_or_default();

        let (status, shown) = ctx.get(&format!("/api/form-show/laporan-mentee/{id}"), &token).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(shown["data"]["laporan"]["tujuan"], "Kerja");

        let (status, _) = ctx.get("/api/form-show/laporan-mentee/abc", &token).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, payload) = ctx
            .send_json(
                Method::PUT,
                &format!("/api/form-submit/laporan-mentee/{id}"),
                &token,
                json!({"laporan": {"mentee_id": mentee.id, "tujuan": "Kursus"}}),
            )
            .await?;
        assert_eq!(status, StatusCode::OK, "{payload}");
        assert_eq!(payload["message"], "Data updated successfully.");

        let logs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM form_update_logs WHERE table_name = 'laporan'")
            .fetch_one(&ctx.pool)
            .await?;
        assert_eq!(logs, 1);

        let (status, payload) = ctx
            .send_json(Method::PUT, "/api/form-submit/laporan-mentee/x1", &token, json!({}))
            .await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(payload["error"], "Invalid ID");
        Ok(())
    }

    #[tokio::test]
    async fn form_rule_rejections_use_the_message_envelope() -> TestResult {
        let ctx = TestContext::new().await?;
        ctx.create_user("Admin", "admin@example.com", UserRole::Superadmin).await?;
        ctx.create_mentor("Mentor", "mentor@example.com", "Gombak").await?;
        let token = ctx.login("admin@example.com").await?;

        let body = json!({
            "users": {"name": "Kembar", "email": "mentor@example.com", "password": "rahsia", "role": "mentor"},
            "mentors": {"parol_daerah": "Gombak"}
        });
        let (status, payload) = ctx
            .send_json(Method::POST, "/api/form-submit/form-mentors", &token, body)
            .await?;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(payload["message"], "Maaf, email tersebut sudah digunakan.");
        assert!(payload.get("error").is_none());

        let body = json!({"users": {"email": "baru@example.com"}, "mentees": {}});
        let (status, payload) = ctx
            .send_json(Method::POST, "/api/form-submit/form-mentees", &token, body)
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload, json!({"message": "ID prospek tidak dijumpai."}));

        let (status, payload) = ctx
            .send_json(Method::POST, "/api/form-submit/form-unknown", &token, json!({}))
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["error"], "Form relation not defined.");
        Ok(())
    }

    #[tokio::test]
    async fn listing_rejects_tables_outside_the_whitelist() -> TestResult {
        let ctx = TestContext::new().await?;
        ctx.create_user("Admin", "admin@example.com", UserRole::Admin).await?;
        let token = ctx.login("admin@example.com").await?;

        let (status, payload) = ctx.get("/api/listing/sessions", &token).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(payload["error"], "Table not allowed.");
        Ok(())
    }

    #[tokio::test]
    async fn join_filter_reads_bracket_queries() -> TestResult {
        let ctx = TestContext::new().await?;
        let mentor = ctx.create_mentor("M1", "m1@example.com", "Gombak").await?;
        ctx.create_mentee("A", "a@example.com", mentor.id).await?;
        ctx.create_mentee("B", "b@example.com", mentor.id).await?;
        let token = ctx.login("m1@example.com").await?;

        let (status, payload) = ctx
            .get(
                "/api/listing-join-filter/mentees?with[]=user:id,name&filters[user.name]=B",
                &token,
            )
            .await?;
        assert_eq!(status, StatusCode::OK, "{payload}");
        let rows = payload["data"].as_array().cloned().unwrap_or_default();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["user"]["name"], "B");
        Ok(())
    }
}

mod notification_tests {
    use super::*;
    use chrono::Utc;
    use retrack_backend_api::services::monitoring::{self, MissingReport};

    #[tokio::test]
    async fn feed_and_mark_read() -> TestResult {
        let ctx = TestContext::new().await?;
        ctx.create_user("Mentee", "mentee@example.com", UserRole::Mentee).await?;
        ctx.create_user("Other", "other@example.com", UserRole::Mentee).await?;
        let token = ctx.login("mentee@example.com").await?;
        let other = ctx.login("other@example.com").await?;

        let (status, payload) = ctx
            .send_json(Method::POST, "/api/test-notification", &token, json!({}))
            .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["message"], "Notifikasi dihantar");

        let (status, feed) = ctx.get("/api/notifications-feed?per_page=500", &token).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(feed["meta"]["per_page"], 50);
        assert_eq!(feed["meta"]["current_page"], 1);
        assert_eq!(feed["meta"]["has_more"], false);
        assert_eq!(feed["data"][0]["title"], "Notifikasi Ujian");
        assert!(feed["data"][0]["created_at"].as_str().unwrap_or_default().ends_with('Z'));

        let (status, latest) = ctx.get("/api/notifications", &token).await?;
        assert_eq!(status, StatusCode::OK);
        let id = latest[0]["id"].as_str().unwrap_or_default().to_string();
        assert_eq!(latest[0]["type"], "test");
        assert!(latest[0].get("user_id").is_none());

        let uri = format!("/api/notifications/{id}/read");
        let (status, payload) = ctx.send_json(Method::POST, &uri, &other, json!({})).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(payload, json!({"message": "Not found"}));

        let (status, payload) = ctx.send_json(Method::POST, &uri, &token, json!({})).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["success"], true);

        let (_, latest) = ctx.get("/api/notifications", &token).await?;
        assert!(latest[0]["read_at"].is_string());
        Ok(())
    }

    #[tokio::test]
    async fn daily_batches_skip_recipients_already_notified() -> TestResult {
        let ctx = TestContext::new().await?;
        let mentor = ctx.create_mentor("Mentor", "mentor@example.com", "Gombak").await?;
        let mentee = ctx.create_mentee("Mentee", "mentee@example.com", mentor.id).await?;
        let admin = ctx.create_user("Admin", "admin@example.com", UserRole::Admin).await?;
        sqlx::query("INSERT INTO admins (user_id, nama_penuh, parol_daerah) VALUES (?, ?, ?)")
            .bind(admin.id)
            .bind("Admin")
            .bind("Gombak")
            .execute(&ctx.pool)
            .await?;

        let now = Utc::now();
        let first = monitoring::notify_missing(&ctx.pool, ctx.state.dedupe(), ctx.state.monitoring(), now).await?;
        assert_eq!(first, MissingReport { mentors: 1, admins: 1 });
        let second = monitoring::notify_missing(&ctx.pool, ctx.state.dedupe(), ctx.state.monitoring(), now).await?;
        assert_eq!(second.mentors, 0);
        assert_eq!(second.admins, 0);

        assert_eq!(monitoring::notify_overdue(&ctx.pool, ctx.state.dedupe(), ctx.state.monitoring(), now).await?, 1);
        assert_eq!(monitoring::notify_overdue(&ctx.pool, ctx.state.dedupe(), ctx.state.monitoring(), now).await?, 0);

        for (user_id, expected) in [(mentor.id, 1), (admin.id, 1), (mentee.id, 1)] {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&ctx.pool)
                .await?;
            assert_eq!(count, expected);
        }
        Ok(())
    }

    #[tokio::test]
    async fn late_submission_listing_is_role_scoped() -> TestResult {
        let ctx = TestContext::new().await?;
        let mentor = ctx.create_mentor("Mentor", "mentor@example.com", "Gombak").await?;
        ctx.create_mentee("Mentee", "mentee@example.com", mentor.id).await?;

        let mentor_token = ctx.login("mentor@example.com").await?;
        let (status, payload) = ctx.get("/api/listing-late-submissions-mentor", &mentor_token).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["data"][0]["name"], "Mentee");
        assert!(payload["data"][0]["last_laporan_at"].is_null());

        let mentee_token = ctx.login("mentee@example.com").await?;
        let (status, _) = ctx.get("/api/listing-late-submissions", &mentee_token).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        Ok(())
    }
}
