//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

/// Runtime configuration for parley-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"127.0.0.1:8000"`).
    pub bind_address: String,

    /// SQLite database URL (default: `"sqlite://parley.db"`).
    /// Any sqlx-compatible SQLite connection string works, including
    /// `"sqlite::memory:"` for throwaway instances.
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated list of allowed CORS origins; `None` means wildcard.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI at `/swagger-ui` (default: `true`).
    /// Disable in production to avoid exposing the API structure.
    pub enable_swagger: bool,

    /// Overall timeout for one upstream relay request, connection through
    /// last byte (default: 60 s).
    pub upstream_timeout: Duration,

    /// Lifetime of issued access tokens in minutes (default: 1440).
    pub token_ttl_minutes: i64,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("PARLEY_BIND", "127.0.0.1:8000"),
            database_url: env_or("PARLEY_DATABASE_URL", "sqlite://parley.db"),
            log_level: env_or("PARLEY_LOG", "info"),
            log_json: std::env::var("PARLEY_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            cors_allowed_origins: std::env::var("PARLEY_CORS_ORIGINS").ok(),
            enable_swagger: std::env::var("PARLEY_ENABLE_SWAGGER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            upstream_timeout: Duration::from_secs(parse_env("PARLEY_UPSTREAM_TIMEOUT_SECS", 60)),
            token_ttl_minutes: parse_env("PARLEY_TOKEN_TTL_MINUTES", 1440),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8000".to_owned(),
            database_url: "sqlite://parley.db".to_owned(),
            log_level: "info".to_owned(),
            log_json: false,
            cors_allowed_origins: None,
            enable_swagger: true,
            upstream_timeout: Duration::from_secs(60),
            token_ttl_minutes: 1440,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
