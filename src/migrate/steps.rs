//! Connection targets and the side-effecting migration steps.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bridge::{DumpArtifact, DumpBridge};
use crate::config::non_empty_env;
use crate::deadline::bounded;
use crate::error::SnapshotError;
use crate::persistence::{Database, DatabaseSettings, TableCounts};

/// Where the current connection string comes from.
pub trait TargetSource {
    /// Reads the connection string as it is right now.
    fn database_url(&mut self) -> Option<String>;
}

/// Process environment, refreshed from `.env` on every read so an edit
/// made during the checkpoint is picked up.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvTarget;

impl TargetSource for EnvTarget {
    fn database_url(&mut self) -> Option<String> {
        if let Err(e) = dotenvy::dotenv_override() {
            tracing::debug!(error = %e, "no .env file reloaded");
        }
        non_empty_env("DATABASE_URL")
    }
}

/// The three side-effecting steps of a migration.
pub trait MigrationSteps {
    /// Dumps `source` to `output`.
    fn backup(
        &self,
        source: Option<&str>,
        output: &Path,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<DumpArtifact, SnapshotError>> + Send;

    /// Restores `backup` into `target`.
    fn restore(
        &self,
        target: Option<&str>,
        backup: &Path,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), SnapshotError>> + Send;

    /// Counts the tracked rows in `target`.
    fn verify(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<TableCounts, SnapshotError>> + Send;
}

/// Production steps: `pg_dump` / `psql` through [`DumpBridge`], then row
/// counts through a short-lived [`Database`].
#[derive(Debug, Clone)]
pub struct CutoverSteps {
    bridge: DumpBridge,
    connect_timeout: Duration,
    query_timeout: Duration,
}

impl CutoverSteps {
    /// Creates the production steps.
    #[must_use]
    pub const fn new(bridge: DumpBridge, connect_timeout: Duration, query_timeout: Duration) -> Self {
        Self {
            bridge,
            connect_timeout,
            query_timeout,
        }
    }
}

impl MigrationSteps for CutoverSteps {
    async fn backup(
        &self,
        source: Option<&str>,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<DumpArtifact, SnapshotError> {
        self.bridge.dump(source, output, cancel).await
    }

    async fn restore(
        &self,
        target: Option<&str>,
        backup: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SnapshotError> {
        self.bridge.restore(target, backup, cancel).await
    }

    async fn verify(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<TableCounts, SnapshotError> {
        let settings = DatabaseSettings::single(target, self.connect_timeout);
        let db = bounded(
            "verification connect",
            self.connect_timeout,
            cancel,
            Database::open(&settings),
        )
        .await?;
        let counts = bounded(
            "verification count",
            self.query_timeout,
            cancel,
            db.table_counts(),
        )
        .await;
        db.close().await;
        counts
    }
}
