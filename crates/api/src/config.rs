use std::time::Duration;

/// Server configuration loaded from environment variables.
///
/// Supervisor settings live in [`talkvid_worker::SupervisorConfig`]; this
/// struct only covers the HTTP surface and the store.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`). Log follow streams
    /// are exempt.
    pub request_timeout_secs: u64,
    /// PostgreSQL URL. Without it tasks are kept in memory only.
    pub database_url: Option<String>,
    /// Terminal tasks older than this many days are purged (default: `7`).
    pub task_retention_days: i64,
    /// How often the retention sweep runs.
    pub retention_interval: Duration,
    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `HOST`                    | `0.0.0.0`               |
    /// | `PORT`                    | `3000`                  |
    /// | `CORS_ORIGINS`            | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                    |
    /// | `DATABASE_URL`            | unset (in-memory store) |
    /// | `TASK_RETENTION_DAYS`     | `7`                     |
    /// | `RETENTION_INTERVAL_SECS` | `3600`                  |
    /// | `LOG_FORMAT`              | `text` (`json` for JSON)|
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let task_retention_days: i64 = std::env::var("TASK_RETENTION_DAYS")
            .unwrap_or_else(|_| "7".into())
            .parse()
            .expect("TASK_RETENTION_DAYS must be a valid i64");

        let retention_interval_secs: u64 = std::env::var("RETENTION_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .expect("RETENTION_INTERVAL_SECS must be a valid u64");
        assert!(
            retention_interval_secs > 0,
            "RETENTION_INTERVAL_SECS must be positive"
        );

        let log_json = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            database_url,
            task_retention_days,
            retention_interval: Duration::from_secs(retention_interval_secs),
            log_json,
        }
    }
}
