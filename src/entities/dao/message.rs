use chrono::{DateTime, Utc};

/// A single row in the `messages` table.
///
/// Messages are immutable once created; they are only ever appended, and
/// ascending `id` is the conversation's replay order.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    /// `"user"`, `"assistant"`, or `"system"`.
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub conversation_id: i64,
}

/// Fields supplied by callers when appending a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub role: String,
    pub content: String,
}
