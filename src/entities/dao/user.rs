/// A single row in the `users` table.
///
/// `model_base_url` / `model_api_key` / `model_name` are the user's stored
/// defaults for the upstream model endpoint; a chat request may override any
/// of them per-call.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub hashed_password: String,
    pub model_base_url: String,
    pub model_api_key: String,
    pub model_name: String,
}
