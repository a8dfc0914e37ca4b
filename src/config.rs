//! Runtime configuration.
//!
//! All knobs come from environment variables so the service can be wired
//! identically in containers and in tests. Durations are seconds unless the
//! variable name says otherwise.

use std::time::Duration;

/// Service settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Database URL. `postgres://` selects the PostgreSQL backend (requires
    /// the `postgres` feature); anything else is treated as a SQLite path.
    pub database_url: String,
    /// Base URL of the external ticket source.
    pub source_url: String,
    /// Endpoint that receives high-urgency notifications.
    pub notify_url: String,

    /// Maximum pooled store connections.
    pub db_pool_max: usize,
    /// Connections the pool tries to keep warm (PostgreSQL only).
    pub db_pool_min: usize,
    /// Idle connection recycle threshold (PostgreSQL only).
    pub db_idle_timeout: Duration,
    /// Store connect/socket timeout.
    pub db_timeout: Duration,

    /// Outbound requests admitted per rate-limit window.
    pub rate_limit: usize,
    /// Rate-limit window length.
    pub rate_window: Duration,

    /// Page-fetch timeout.
    pub fetch_timeout: Duration,
    /// Notification POST timeout.
    pub notify_timeout: Duration,
    /// Dependency probe timeout for `/health`.
    pub probe_timeout: Duration,

    /// Ingestion lock TTL.
    pub lock_ttl: Duration,
    /// Lease refresh cadence (half the TTL).
    pub lock_refresh_interval: Duration,

    /// Notification queue capacity.
    pub notify_queue: usize,
    /// Notification worker count.
    pub notify_workers: usize,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            database_url: env_or("TICKETFLOW_DATABASE_URL", "ticketflow.sqlite"),
            source_url: env_or(
                "TICKETFLOW_SOURCE_URL",
                "http://localhost:9000/external/support-tickets",
            ),
            notify_url: env_or("TICKETFLOW_NOTIFY_URL", "http://localhost:9000/notify"),
            db_pool_max: env_parse("TICKETFLOW_DB_POOL_MAX", 50),
            db_pool_min: env_parse("TICKETFLOW_DB_POOL_MIN", 10),
            db_idle_timeout: Duration::from_secs(env_parse("TICKETFLOW_DB_IDLE_SECS", 45)),
            db_timeout: Duration::from_secs(env_parse("TICKETFLOW_DB_TIMEOUT_SECS", 5)),
            rate_limit: env_parse("TICKETFLOW_RATE_LIMIT", 60),
            rate_window: Duration::from_secs(env_parse("TICKETFLOW_RATE_WINDOW_SECS", 60)),
            fetch_timeout: Duration::from_secs(env_parse("TICKETFLOW_FETCH_TIMEOUT_SECS", 15)),
            notify_timeout: Duration::from_secs(env_parse("TICKETFLOW_NOTIFY_TIMEOUT_SECS", 10)),
            probe_timeout: Duration::from_secs(env_parse("TICKETFLOW_PROBE_TIMEOUT_SECS", 5)),
            lock_ttl: Duration::from_secs(env_parse("TICKETFLOW_LOCK_TTL_SECS", 60)),
            lock_refresh_interval: Duration::from_secs(env_parse(
                "TICKETFLOW_LOCK_REFRESH_SECS",
                30,
            )),
            notify_queue: env_parse("TICKETFLOW_NOTIFY_QUEUE", 256),
            notify_workers: env_parse("TICKETFLOW_NOTIFY_WORKERS", 4),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
