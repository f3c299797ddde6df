use std::future::Future;

use chrono::Utc;
use tracing::warn;

use crate::entities::{
    dao::{Message, NewMessage},
    SqliteStore,
};

pub trait ChatStore: Send + Sync + 'static {
    fn append_message(
        &self,
        msg: NewMessage,
    ) -> impl Future<Output = Result<Message, sqlx::Error>> + Send;
    /// All messages of a conversation in creation order, oldest first.
    fn list_messages(
        &self,
        conversation_id: i64,
    ) -> impl Future<Output = Result<Vec<Message>, sqlx::Error>> + Send;
}

impl ChatStore for SqliteStore {
    async fn append_message(&self, msg: NewMessage) -> Result<Message, sqlx::Error> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO messages (role, content, created_at, conversation_id) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&msg.role)
        .bind(&msg.content)
        .bind(created_at.to_rfc3339())
        .bind(msg.conversation_id)
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id: result.last_insert_rowid(),
            role: msg.role,
            content: msg.content,
            created_at,
            conversation_id: msg.conversation_id,
        })
    }

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, sqlx::Error> {
        let rows: Vec<(i64, String, String, String, i64)> = sqlx::query_as(
            "SELECT id, role, content, created_at, conversation_id \
             FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, role, content, created_at, conversation_id)| Message {
                id,
                role,
                content,
                created_at: created_at.parse().unwrap_or_else(|e: chrono::ParseError| {
                    warn!(raw = %created_at, error = %e, "failed to parse message created_at; using now");
                    Utc::now()
                }),
                conversation_id,
            })
            .collect())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
