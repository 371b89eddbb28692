//! Fixed DDL for the tracked tables and startup schema bootstrap.
//!
//! The same `CREATE TABLE IF NOT EXISTS` text is embedded in every
//! snapshot, so a snapshot can be replayed against an empty database.

use super::postgres::Database;
use crate::error::SnapshotError;

/// Create-if-absent guard for `users`.
pub const CREATE_USERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS users (
  id SERIAL PRIMARY KEY,
  email VARCHAR(255) UNIQUE NOT NULL,
  password VARCHAR(255) NOT NULL,
  email_verified BOOLEAN DEFAULT FALSE,
  verification_token VARCHAR(255),
  verification_token_expires TIMESTAMP,
  reset_token VARCHAR(64),
  reset_token_expires TIMESTAMP,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

/// Create-if-absent guard for `posts`.
pub const CREATE_POSTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS posts (
  id SERIAL PRIMARY KEY,
  user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
  platform VARCHAR(50) NOT NULL,
  topic TEXT NOT NULL,
  content TEXT NOT NULL,
  ascii_art TEXT,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

/// Adds the password-reset columns to databases created before they
/// existed.
pub const ADD_PASSWORD_RESET_COLUMNS: &str = "ALTER TABLE users
  ADD COLUMN IF NOT EXISTS reset_token VARCHAR(64),
  ADD COLUMN IF NOT EXISTS reset_token_expires TIMESTAMP";

/// Index backing the per-user post listing.
pub const CREATE_POSTS_USER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_posts_user_id ON posts(user_id)";

/// Creates the tracked tables if they are missing and upgrades older
/// `users` tables with the password-reset columns.
///
/// # Errors
///
/// Returns [`SnapshotError::Connectivity`] if a table or the index cannot
/// be created. A failing column upgrade is logged and ignored.
pub async fn init_schema(db: &Database) -> Result<(), SnapshotError> {
    let mut conn = db.acquire().await?;

    sqlx::query(CREATE_USERS_TABLE)
        .execute(&mut *conn)
        .await
        .map_err(SnapshotError::connectivity)?;

    if let Err(e) = sqlx::query(ADD_PASSWORD_RESET_COLUMNS)
        .execute(&mut *conn)
        .await
    {
        tracing::info!(error = %e, "password reset columns may already exist");
    }

    sqlx::query(CREATE_POSTS_TABLE)
        .execute(&mut *conn)
        .await
        .map_err(SnapshotError::connectivity)?;

    sqlx::query(CREATE_POSTS_USER_INDEX)
        .execute(&mut *conn)
        .await
        .map_err(SnapshotError::connectivity)?;

    tracing::info!("database tables initialized");
    Ok(())
}
