use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use retrack_auth::{NewUser, UserRole};
use retrack_backend_api::{build_router, services::monitoring};
use retrack_backend_runtime::{telemetry, BackendServices};
use retrack_config::{load as load_config, AppConfig};
use retrack_database::clock::now_timestamp;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "retrack-backend")]
#[command(about = "Retrack backend (HTTP server by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve,
    /// Remind mentees who have not submitted a laporan within the overdue window
    NotifyOverdue,
    /// Tell mentors and district admins how many mentees have not reported today
    NotifyMissing,
    /// Delete expired sessions and dedupe markers
    PruneTokens,
    /// Create one demo account per role
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init_tracing().context("failed to initialise tracing")?;
    let config = load_config().context("failed to load configuration")?;
    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(&config, &services).await,
        Commands::NotifyOverdue => notify_overdue(&config, &services).await,
        Commands::NotifyMissing => notify_missing(&config, &services).await,
        Commands::PruneTokens => prune_tokens(&services).await,
        Commands::Seed => seed(&services).await,
    }
}

async fn run_server(config: &AppConfig, services: &BackendServices) -> anyhow::Result<()> {
    info!("starting Retrack backend");

    let app = build_router(services.app_state(config));

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(retrack_backend_runtime::shutdown_signal())
        .await
        .context("http server error")?;

    info!("backend shut down");
    Ok(())
}

async fn notify_overdue(config: &AppConfig, services: &BackendServices) -> anyhow::Result<()> {
    let sent = monitoring::notify_overdue(&services.db_pool, &services.dedupe, &config.monitoring, Utc::now())
        .await
        .context("overdue reminder batch failed")?;
    println!("Overdue reminders sent: {sent}");
    Ok(())
}

async fn notify_missing(config: &AppConfig, services: &BackendServices) -> anyhow::Result<()> {
    let report = monitoring::notify_missing(&services.db_pool, &services.dedupe, &config.monitoring, Utc::now())
        .await
        .context("missing report batch failed")?;
    println!(
        "Missing report notifications sent: {} mentors, {} admins",
        report.mentors, report.admins
    );
    Ok(())
}

async fn prune_tokens(services: &BackendServices) -> anyhow::Result<()> {
    let report = monitoring::prune(&services.authenticator, &services.dedupe, Utc::now())
        .await
        .context("prune failed")?;
    println!(
        "Pruned {} expired sessions and {} dedupe markers",
        report.sessions, report.markers
    );
    Ok(())
}

const DEMO_PASSWORD: &str = "password";
const DEMO_DISTRICT: &str = "Gombak";

async fn seed(services: &BackendServices) -> anyhow::Result<()> {
    let created = seed_demo_accounts(services).await?;
    println!("Seeded {created} demo accounts (password: {DEMO_PASSWORD})");
    Ok(())
}

/// Returns the number of accounts created; existing emails are left alone.
async fn seed_demo_accounts(services: &BackendServices) -> anyhow::Result<usize> {
    let pool = &services.db_pool;
    let mut created = 0;

    let accounts = [
        ("Superadmin Demo", "superadmin@retrack.test", UserRole::Superadmin),
        ("Admin Demo", "admin@retrack.test", UserRole::Admin),
        ("Mentor Demo", "mentor@retrack.test", UserRole::Mentor),
        ("Mentee Demo", "mentee@retrack.test", UserRole::Mentee),
        ("Dev Demo", "dev@retrack.test", UserRole::Dev),
    ];

    let mut mentor_id = None;
    for (name, email, role) in accounts {
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ? COLLATE NOCASE")
            .bind(email)
            .fetch_optional(pool)
            .await
            .with_context(|| format!("failed to look up {email}"))?;

        let user_id = match existing {
            Some(id) => id,
            None => {
                let user = services
                    .authenticator
                    .create_user(&NewUser {
                        name: name.to_string(),
                        email: email.to_string(),
                        password: DEMO_PASSWORD.to_string(),
                        role,
                    })
                    .await
                    .with_context(|| format!("failed to create {email}"))?;
                created += 1;
                create_profile(pool, user.id, name, role, mentor_id).await?;
                user.id
            }
        };

        if role == UserRole::Mentor {
            mentor_id = Some(user_id);
        }
    }

    info!(created, "demo accounts seeded");
    Ok(created)
}

async fn create_profile(
    pool: &sqlx::SqlitePool,
    user_id: i64,
    name: &str,
    role: UserRole,
    mentor_id: Option<i64>,
) -> anyhow::Result<()> {
    let now = now_timestamp();
    match role {
        UserRole::Mentor | UserRole::Admin | UserRole::Superadmin => {
            let table = if role == UserRole::Mentor { "mentors" } else { "admins" };
            sqlx::query(&format!(
                "INSERT INTO {table} (user_id, nama_penuh, pangkat, parol_daerah, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?)"
            ))
            .bind(user_id)
            .bind(name)
            .bind("Pegawai Parol")
            .bind(DEMO_DISTRICT)
            .bind(&now)
            .bind(&now)
            .execute(pool)
            .await
            .with_context(|| format!("failed to create {table} profile"))?;
        }
        UserRole::Mentee => {
            sqlx::query(
                "INSERT INTO mentees (user_id, id_prospek, daerah, mentor_id, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(user_id)
            .bind(format!("DEMO-{user_id:04}"))
            .bind(DEMO_DISTRICT)
            .bind(mentor_id)
            .bind(&now)
            .bind(&now)
            .execute(pool)
            .await
            .context("failed to create mentee profile")?;
        }
        UserRole::Dev => {}
    }
    Ok(())
}
