use std::future::Future;

use crate::entities::{dao::User, SqliteStore};

/// Stored defaults for users created without any explicit configuration.
pub const DEFAULT_MODEL_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL_NAME: &str = "gpt-3.5-turbo";

pub trait UserStore: Send + Sync + 'static {
    fn create_user(
        &self,
        username: &str,
        hashed_password: &str,
    ) -> impl Future<Output = Result<User, sqlx::Error>> + Send;
    fn get_user(&self, id: i64) -> impl Future<Output = Result<Option<User>, sqlx::Error>> + Send;
    fn get_user_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<User>, sqlx::Error>> + Send;
    /// Overwrite the user's stored model configuration with the given
    /// values.  Per-field merging with the previous values is the caller's
    /// concern.
    fn update_model_config(
        &self,
        user_id: i64,
        base_url: &str,
        api_key: &str,
        model_name: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

impl UserStore for SqliteStore {
    async fn create_user(&self, username: &str, hashed_password: &str) -> Result<User, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (username, hashed_password, model_base_url, model_api_key, model_name) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(username)
        .bind(hashed_password)
        .bind(DEFAULT_MODEL_BASE_URL)
        .bind("")
        .bind(DEFAULT_MODEL_NAME)
        .execute(&self.pool)
        .await?;

        Ok(User {
            id: result.last_insert_rowid(),
            username: username.to_owned(),
            hashed_password: hashed_password.to_owned(),
            model_base_url: DEFAULT_MODEL_BASE_URL.to_owned(),
            model_api_key: String::new(),
            model_name: DEFAULT_MODEL_NAME.to_owned(),
        })
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<(i64, String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, username, hashed_password, model_base_url, model_api_key, model_name \
             FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_user))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<(i64, String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, username, hashed_password, model_base_url, model_api_key, model_name \
             FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_user))
    }

    async fn update_model_config(
        &self,
        user_id: i64,
        base_url: &str,
        api_key: &str,
        model_name: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET model_base_url = ?1, model_api_key = ?2, model_name = ?3 \
             WHERE id = ?4",
        )
        .bind(base_url)
        .bind(api_key)
        .bind(model_name)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_user(
    (id, username, hashed_password, model_base_url, model_api_key, model_name): (
        i64,
        String,
        String,
        String,
        String,
        String,
    ),
) -> User {
    User {
        id,
        username,
        hashed_password,
        model_base_url,
        model_api_key,
        model_name,
    }
}
