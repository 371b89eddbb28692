//! PostgreSQL connection provider.

use std::time::Duration;

use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres};
use utoipa::ToSchema;

use super::models::{Entity, PostRow, UserRow};
use crate::error::SnapshotError;

/// Pool settings for one database endpoint.
#[derive(Clone)]
pub struct DatabaseSettings {
    /// PostgreSQL connection string.
    pub url: String,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Minimum idle connections.
    pub min_connections: u32,
    /// Upper bound for establishing or acquiring a connection.
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl DatabaseSettings {
    /// Settings for a short-lived single-connection pool, used for probes
    /// and one-off verification queries.
    #[must_use]
    pub fn single(url: &str, connect_timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            max_connections: 1,
            min_connections: 0,
            connect_timeout,
        }
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.connect_timeout)
    }
}

/// Row counts for both tracked tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct TableCounts {
    /// Rows in `users`.
    pub users: i64,
    /// Rows in `posts`.
    pub posts: i64,
}

impl TableCounts {
    /// `true` when neither table has any rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.users == 0 && self.posts == 0
    }
}

/// PostgreSQL connection provider backed by `sqlx::PgPool`.
///
/// Constructed explicitly with [`Database::open`] (or [`Database::lazy`])
/// and released with [`Database::close`]. Components borrow one
/// connection per logical step via [`Database::acquire`]; the returned
/// [`PoolConnection`] goes back to the pool when dropped, on every exit
/// path.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Opens a pool and establishes the first connection.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Connectivity`] if the URL is invalid or the
    /// server cannot be reached within the connect timeout.
    pub async fn open(settings: &DatabaseSettings) -> Result<Self, SnapshotError> {
        let pool = settings
            .pool_options()
            .connect(&settings.url)
            .await
            .map_err(SnapshotError::connectivity)?;
        tracing::debug!(
            max_connections = settings.max_connections,
            "database pool opened"
        );
        Ok(Self { pool })
    }

    /// Creates a pool that connects on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Configuration`] if the URL cannot be parsed.
    pub fn lazy(settings: &DatabaseSettings) -> Result<Self, SnapshotError> {
        let pool = settings
            .pool_options()
            .connect_lazy(&settings.url)
            .map_err(|e| SnapshotError::Configuration(format!("invalid DATABASE_URL: {e}")))?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Borrows one connection for the duration of a logical step.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Connectivity`] if no connection becomes
    /// available within the acquire timeout.
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, SnapshotError> {
        self.pool.acquire().await.map_err(SnapshotError::connectivity)
    }

    /// Trivial round-trip query used to validate a target before any
    /// heavier work starts.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Connectivity`] on failure.
    pub async fn probe(&self) -> Result<(), SnapshotError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(SnapshotError::connectivity)?;
        Ok(())
    }

    /// Counts the rows of one tracked table.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Connectivity`] on database failure.
    pub async fn count_rows(&self, entity: Entity) -> Result<i64, SnapshotError> {
        let sql = format!("SELECT COUNT(*) FROM {}", entity.table());
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(SnapshotError::connectivity)
    }

    /// Counts the rows of both tracked tables.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Connectivity`] on database failure.
    pub async fn table_counts(&self) -> Result<TableCounts, SnapshotError> {
        Ok(TableCounts {
            users: self.count_rows(Entity::Users).await?,
            posts: self.count_rows(Entity::Posts).await?,
        })
    }

    /// Closes every pooled connection and waits for them to shut down.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::debug!("database pool closed");
    }
}

/// Loads every user ordered by id.
///
/// # Errors
///
/// Returns [`SnapshotError::Connectivity`] on database failure.
pub async fn load_users(conn: &mut PgConnection) -> Result<Vec<UserRow>, SnapshotError> {
    sqlx::query_as::<_, UserRow>(
        "SELECT id, email, password, email_verified, verification_token, \
         verification_token_expires, reset_token, reset_token_expires, created_at \
         FROM users ORDER BY id",
    )
    .fetch_all(conn)
    .await
    .map_err(SnapshotError::connectivity)
}

/// Loads every post ordered by id.
///
/// # Errors
///
/// Returns [`SnapshotError::Connectivity`] on database failure.
pub async fn load_posts(conn: &mut PgConnection) -> Result<Vec<PostRow>, SnapshotError> {
    sqlx::query_as::<_, PostRow>(
        "SELECT id, user_id, platform, topic, content, ascii_art, created_at \
         FROM posts ORDER BY id",
    )
    .fetch_all(conn)
    .await
    .map_err(SnapshotError::connectivity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_counts_empty() {
        assert!(TableCounts::default().is_empty());
        assert!(!TableCounts { users: 1, posts: 0 }.is_empty());
    }

    #[test]
    fn settings_debug_redacts_url() {
        let settings =
            DatabaseSettings::single("postgres://app:hunter2@db/app", Duration::from_secs(5));
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("hunter2"));
        assert_eq!(settings.max_connections, 1);
    }

    #[tokio::test]
    async fn lazy_rejects_unparseable_url() {
        let settings = DatabaseSettings::single("not a url", Duration::from_secs(1));
        let result = Database::lazy(&settings);
        assert!(matches!(result, Err(SnapshotError::Configuration(_))));
    }

    #[tokio::test]
    async fn lazy_does_not_connect() {
        let settings =
            DatabaseSettings::single("postgres://nobody@127.0.0.1:1/none", Duration::from_secs(1));
        let result = Database::lazy(&settings);
        assert!(result.is_ok());
    }
}
