//! Database abstraction layer.
//!
//! Each `*Store` trait defines the interface for one slice of persistence;
//! the default implementation for all of them is [`SqliteStore`].  To swap to
//! another database, implement the traits for a new pool type and change the
//! concrete type in [`crate::state::AppState`].
//!
//! All trait methods use `impl Future` in their signatures (stable since Rust
//! 1.75) so no extra `async-trait` crate is required.  No method holds a
//! connection beyond its own query: the relay depends on every write checking
//! a connection out of the pool only for the duration of that statement.

pub mod chat;
pub mod conversation;
pub mod dao;
pub mod token;
pub mod user;

pub use dao::{AccessToken, Conversation, Message, NewMessage, User};

pub use chat::ChatStore;
pub use conversation::ConversationStore;
pub use token::TokenStore;
pub use user::UserStore;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// SQLite-backed store for users, conversations, messages, and tokens.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending
    /// migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g.
    /// `"sqlite://parley.db"` or `"sqlite::memory:"` for tests.
    ///
    /// `sqlx::migrate!("./migrations")` resolves the path at compile time
    /// relative to `CARGO_MANIFEST_DIR`, so the migration files are embedded
    /// into the binary.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every pooled connection to `:memory:` is a distinct database, so
        // the pool is pinned to one permanent connection in that case;
        // otherwise the migrator and later queries would not agree on which
        // database they see.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}
