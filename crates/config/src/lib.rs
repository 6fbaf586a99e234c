use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "retrack.toml",
    "config/retrack.toml",
    "crates/config/retrack.toml",
    "../retrack.toml",
    "../config/retrack.toml",
    "backend/retrack.toml",
    "backend/config/retrack.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://retrack.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_session_ttl")]
    pub session_ttl_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: Self::default_session_ttl(),
        }
    }
}

impl AuthConfig {
    const fn default_session_ttl() -> u64 {
        86_400
    }
}

/// Backing store for the once-per-day notification keys.
///
/// When `redis_url` is unset, or the server is unreachable at start-up, the
/// keys are kept in the `cache_entries` table instead.
///
/// ```
/// use retrack_config::CacheConfig;
///
/// let cache = CacheConfig::default();
/// assert!(cache.redis_url.is_none());
/// assert_eq!(cache.key_prefix, "retrack:");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "CacheConfig::default_key_prefix")]
    pub key_prefix: String,
}

impl CacheConfig {
    fn default_key_prefix() -> String {
        "retrack:".to_string()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: Self::default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Hours without a laporan before a mentee counts as overdue.
    #[serde(default = "MonitoringConfig::default_overdue_hours")]
    pub overdue_hours: i64,
    #[serde(default = "MonitoringConfig::default_mentee_dashboard_url")]
    pub mentee_dashboard_url: String,
    #[serde(default = "MonitoringConfig::default_mentor_late_url")]
    pub mentor_late_url: String,
    #[serde(default = "MonitoringConfig::default_admin_late_url")]
    pub admin_late_url: String,
}

impl MonitoringConfig {
    const fn default_overdue_hours() -> i64 {
        48
    }

    fn default_mentee_dashboard_url() -> String {
        "/mentee/dashboard".to_string()
    }

    fn default_mentor_late_url() -> String {
        "/mentor/mentees-lambat-hantar".to_string()
    }

    fn default_admin_late_url() -> String {
        "/admin/mentees-lambat-hantar".to_string()
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            overdue_hours: Self::default_overdue_hours(),
            mentee_dashboard_url: Self::default_mentee_dashboard_url(),
            mentor_late_url: Self::default_mentor_late_url(),
            admin_late_url: Self::default_admin_late_url(),
        }
    }
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use retrack_config::load;
///
/// std::env::remove_var("RETRACK_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let session_ttl = i64::try_from(defaults.auth.session_ttl_seconds).unwrap_or(i64::MAX);

    let builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default("auth.session_ttl_seconds", session_ttl)?
        .set_default("cache.key_prefix", defaults.cache.key_prefix.clone())?
        .set_default("monitoring.overdue_hours", defaults.monitoring.overdue_hours)?
        .set_default(
            "monitoring.mentee_dashboard_url",
            defaults.monitoring.mentee_dashboard_url.clone(),
        )?
        .set_default(
            "monitoring.mentor_late_url",
            defaults.monitoring.mentor_late_url.clone(),
        )?
        .set_default(
            "monitoring.admin_late_url",
            defaults.monitoring.admin_late_url.clone(),
        )?;

    let mut builder = builder;
    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("RETRACK_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via RETRACK_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(config::Environment::with_prefix("RETRACK").separator("__"));

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    if config.auth.session_ttl_seconds > i64::MAX as u64 {
        config.auth.session_ttl_seconds = i64::MAX as u64;
    }

    if config.monitoring.overdue_hours <= 0 {
        anyhow::bail!("monitoring.overdue_hours must be positive");
    }

    debug!(?config, "loaded backend configuration");
    Ok(config)
}
