//! Configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). The database target is optional at
//! load time; components that need it report a
//! [`SnapshotError::Configuration`] when it is absent.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::bridge::BridgeOptions;
use crate::error::SnapshotError;
use crate::persistence::postgres::DatabaseSettings;
use crate::snapshot::replay::{ReplayMode, ReplayOptions};
use crate::snapshot::splitter::SplitMode;

/// Fixed relative path shared by the `backup` and `restore` commands.
pub const DEFAULT_BACKUP_FILE: &str = "backups/database-backup.sql";

/// Default location of logical snapshots written by `export` and read by
/// `import`.
pub const DEFAULT_SNAPSHOT_FILE: &str = "backups/phosphor-snapshot.sql";

/// Maximum accepted size of an uploaded snapshot (10 MiB).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Top-level configuration.
///
/// Loaded once at startup via [`SnapshotConfig::from_env`].
#[derive(Clone)]
pub struct SnapshotConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// PostgreSQL connection string, if configured.
    pub database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub database_max_connections: u32,

    /// Minimum idle connections in the pool.
    pub database_min_connections: u32,

    /// Timeout in seconds for acquiring a database connection.
    pub database_connect_timeout_secs: u64,

    /// Shared secret for the admin backup/restore endpoints. `None`
    /// disables both endpoints.
    pub admin_token: Option<String>,

    /// Location of the dump file written by `backup` and read by `restore`.
    pub backup_file: PathBuf,

    /// Per-query timeout in seconds.
    pub query_timeout_secs: u64,

    /// Timeout in seconds for one `pg_dump` / `psql` run.
    pub tool_timeout_secs: u64,

    /// Overall timeout for an HTTP request in seconds.
    pub request_timeout_secs: u64,

    /// Whether replay isolates statement failures or wraps everything in
    /// one transaction.
    pub replay_mode: ReplayMode,

    /// Statement splitting strategy for uploaded and imported snapshots.
    pub split_mode: SplitMode,

    /// `pg_dump` executable.
    pub pg_dump_path: String,

    /// `psql` executable.
    pub psql_path: String,

    /// Whether `serve` creates the tracked tables on startup.
    pub init_schema: bool,
}

impl std::fmt::Debug for SnapshotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotConfig")
            .field("listen_addr", &self.listen_addr)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("database_max_connections", &self.database_max_connections)
            .field("database_min_connections", &self.database_min_connections)
            .field(
                "database_connect_timeout_secs",
                &self.database_connect_timeout_secs,
            )
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("backup_file", &self.backup_file)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("replay_mode", &self.replay_mode)
            .field("split_mode", &self.split_mode)
            .field("pg_dump_path", &self.pg_dump_path)
            .field("psql_path", &self.psql_path)
            .field("init_schema", &self.init_schema)
            .finish()
    }
}

impl SnapshotConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Configuration`] if `LISTEN_ADDR`,
    /// `SNAPSHOT_REPLAY_MODE` or `SNAPSHOT_SPLIT_MODE` is set to a value
    /// that cannot be parsed.
    pub fn from_env() -> Result<Self, SnapshotError> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse()
            .map_err(|e| SnapshotError::Configuration(format!("invalid LISTEN_ADDR: {e}")))?;

        let database_url = non_empty_env("DATABASE_URL");

        let database_max_connections = parse_env("DATABASE_MAX_CONNECTIONS", 10);
        let database_min_connections = parse_env("DATABASE_MIN_CONNECTIONS", 0);
        let database_connect_timeout_secs = parse_env("DATABASE_CONNECT_TIMEOUT_SECS", 5);

        let admin_token = non_empty_env("ADMIN_BACKUP_TOKEN");
        let backup_file = std::env::var("SNAPSHOT_BACKUP_FILE")
            .map_or_else(|_| PathBuf::from(DEFAULT_BACKUP_FILE), PathBuf::from);

        let query_timeout_secs = parse_env("SNAPSHOT_QUERY_TIMEOUT_SECS", 60);
        let tool_timeout_secs = parse_env("SNAPSHOT_TOOL_TIMEOUT_SECS", 1800);
        let request_timeout_secs = parse_env("HTTP_REQUEST_TIMEOUT_SECS", 300);

        let replay_mode = match std::env::var("SNAPSHOT_REPLAY_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => ReplayMode::default(),
        };
        let split_mode = match std::env::var("SNAPSHOT_SPLIT_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => SplitMode::default(),
        };

        let pg_dump_path = std::env::var("PG_DUMP_PATH").unwrap_or_else(|_| "pg_dump".to_string());
        let psql_path = std::env::var("PSQL_PATH").unwrap_or_else(|_| "psql".to_string());
        let init_schema = parse_env_bool("SNAPSHOT_INIT_SCHEMA", true);

        Ok(Self {
            listen_addr,
            database_url,
            database_max_connections,
            database_min_connections,
            database_connect_timeout_secs,
            admin_token,
            backup_file,
            query_timeout_secs,
            tool_timeout_secs,
            request_timeout_secs,
            replay_mode,
            split_mode,
            pg_dump_path,
            psql_path,
            init_schema,
        })
    }

    /// Returns the configured database URL.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Configuration`] when `DATABASE_URL` is unset.
    pub fn require_database_url(&self) -> Result<&str, SnapshotError> {
        self.database_url.as_deref().ok_or_else(|| {
            SnapshotError::Configuration("DATABASE_URL not found in environment variables".into())
        })
    }

    /// Pool settings for the given connection string.
    #[must_use]
    pub fn database_settings(&self, url: &str) -> DatabaseSettings {
        DatabaseSettings {
            url: url.to_string(),
            max_connections: self.database_max_connections,
            min_connections: self.database_min_connections,
            connect_timeout: Duration::from_secs(self.database_connect_timeout_secs),
        }
    }

    /// Per-query timeout.
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Replay options derived from this configuration.
    #[must_use]
    pub const fn replay_options(&self) -> ReplayOptions {
        ReplayOptions {
            mode: self.replay_mode,
            split_mode: self.split_mode,
            statement_timeout: self.query_timeout(),
        }
    }

    /// Dump bridge options derived from this configuration.
    #[must_use]
    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            pg_dump: self.pg_dump_path.clone(),
            psql: self.psql_path.clone(),
            timeout: Duration::from_secs(self.tool_timeout_secs),
            probe_timeout: Duration::from_secs(self.database_connect_timeout_secs),
        }
    }
}

/// Reads an environment variable, treating empty values as unset.
pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
        Ok(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_when_unset() {
        // Key is unique to this test so parallel tests cannot interfere.
        assert_eq!(parse_env("PHOSPHOR_TEST_UNSET_NUMBER", 42_u64), 42);
    }

    #[test]
    fn parse_env_bool_default_when_unset() {
        assert!(parse_env_bool("PHOSPHOR_TEST_UNSET_BOOL", true));
        assert!(!parse_env_bool("PHOSPHOR_TEST_UNSET_BOOL", false));
    }

    #[test]
    fn non_empty_env_treats_missing_as_none() {
        assert!(non_empty_env("PHOSPHOR_TEST_UNSET_STRING").is_none());
    }

    #[test]
    fn upload_cap_is_ten_mebibytes() {
        assert_eq!(MAX_UPLOAD_BYTES, 10_485_760);
    }
}
