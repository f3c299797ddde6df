use chrono::{DateTime, Utc};

/// A single row in the `conversations` table.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub user_id: i64,
}
