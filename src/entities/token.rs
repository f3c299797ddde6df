use std::future::Future;

use chrono::Utc;

use crate::entities::{dao::AccessToken, SqliteStore};

pub trait TokenStore: Send + Sync + 'static {
    fn insert_token(
        &self,
        token: AccessToken,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
    fn get_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<AccessToken>, sqlx::Error>> + Send;
    /// Delete every token whose expiry is in the past.  Returns the number
    /// of rows removed.
    fn purge_expired_tokens(&self) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;
}

impl TokenStore for SqliteStore {
    async fn insert_token(&self, token: AccessToken) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO access_tokens (token, user_id, created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&token.token)
        .bind(token.user_id)
        .bind(token.created_at.to_rfc3339())
        .bind(token.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_token(&self, token: &str) -> Result<Option<AccessToken>, sqlx::Error> {
        let row: Option<(String, i64, String, String)> = sqlx::query_as(
            "SELECT token, user_id, created_at, expires_at \
             FROM access_tokens WHERE token = ?1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(token, user_id, created_at, expires_at)| AccessToken {
            token,
            user_id,
            created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
            // An unparseable expiry must not grant access forever; treat it
            // as already expired.
            expires_at: expires_at
                .parse()
                .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC),
        }))
    }

    async fn purge_expired_tokens(&self) -> Result<u64, sqlx::Error> {
        // RFC 3339 UTC timestamps compare correctly as text.
        let result = sqlx::query("DELETE FROM access_tokens WHERE expires_at <= ?1")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
