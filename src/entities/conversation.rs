use std::future::Future;

use chrono::Utc;
use tracing::warn;

use crate::entities::{dao::Conversation, SqliteStore};

pub trait ConversationStore: Send + Sync + 'static {
    fn create_conversation(
        &self,
        user_id: i64,
        title: &str,
    ) -> impl Future<Output = Result<Conversation, sqlx::Error>> + Send;
    fn get_conversation(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<Conversation>, sqlx::Error>> + Send;
    fn list_conversations(
        &self,
        user_id: i64,
        skip: i64,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Conversation>, sqlx::Error>> + Send;
    /// Delete a conversation and all of its messages.
    fn delete_conversation(&self, id: i64) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

impl ConversationStore for SqliteStore {
    async fn create_conversation(
        &self,
        user_id: i64,
        title: &str,
    ) -> Result<Conversation, sqlx::Error> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO conversations (title, created_at, user_id) VALUES (?1, ?2, ?3)",
        )
        .bind(title)
        .bind(created_at.to_rfc3339())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(Conversation {
            id: result.last_insert_rowid(),
            title: title.to_owned(),
            created_at,
            user_id,
        })
    }

    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, sqlx::Error> {
        let row: Option<(i64, String, String, i64)> = sqlx::query_as(
            "SELECT id, title, created_at, user_id FROM conversations WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_conversation))
    }

    async fn list_conversations(
        &self,
        user_id: i64,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Conversation>, sqlx::Error> {
        let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(
            "SELECT id, title, created_at, user_id FROM conversations \
             WHERE user_id = ?1 ORDER BY id ASC LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_conversation).collect())
    }

    async fn delete_conversation(&self, id: i64) -> Result<(), sqlx::Error> {
        // One short transaction so a conversation can never outlive its
        // messages or vice versa.  Cascade is done explicitly rather than
        // relying on the SQLite foreign-key pragma being enabled.
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }
}

fn row_to_conversation((id, title, created_at, user_id): (i64, String, String, i64)) -> Conversation {
    Conversation {
        id,
        title,
        created_at: created_at.parse().unwrap_or_else(|e: chrono::ParseError| {
            warn!(raw = %created_at, error = %e, "failed to parse conversation created_at; using now");
            Utc::now()
        }),
        user_id,
    }
}
