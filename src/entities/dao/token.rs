use chrono::{DateTime, Utc};

/// A single row in the `access_tokens` table.
///
/// Tokens are opaque random strings handed out at login; rows past
/// `expires_at` are ignored at lookup and purged at startup.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
