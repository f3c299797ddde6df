//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::config::Config;
use crate::entities::SqliteStore;

/// State shared across all HTTP handlers.
///
/// The [`reqwest::Client`] holds the outbound connection pool for upstream
/// model endpoints; per-request settings (URL, auth, timeout) are applied on
/// each request builder, so one client serves every user configuration.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Persistent user / conversation / message store.
    pub store: Arc<SqliteStore>,
    /// Outbound HTTP client for upstream chat-completions calls.
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config, store: SqliteStore) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            client: reqwest::Client::new(),
        }
    }
}
