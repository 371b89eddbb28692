//! Snapshot replay against the target database.
//!
//! Statements run one by one on a single borrowed connection. In
//! [`ReplayMode::Isolated`] a failing statement is logged and recorded
//! and replay continues with the next one; in
//! [`ReplayMode::Transactional`] the whole replay runs in one transaction
//! and the first failure rolls everything back.

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use sqlx::{Connection, Executor, PgConnection};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::splitter::{SplitMode, split};
use super::statement::Statement;
use crate::deadline::{bounded, is_interrupted};
use crate::error::SnapshotError;
use crate::persistence::{Database, Entity};

/// Characters of a failing statement included in logs and reports.
const FAILURE_PREVIEW_CHARS: usize = 100;

/// Characters of an executed statement included in debug logs.
const DEBUG_PREVIEW_CHARS: usize = 50;

/// Extra time the client waits beyond the server-side statement timeout.
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// How statement failures affect the rest of a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
    /// Each statement commits on its own; failures are skipped.
    #[default]
    Isolated,
    /// One transaction; any failure aborts and rolls back.
    Transactional,
}

impl FromStr for ReplayMode {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolated" => Ok(Self::Isolated),
            "transactional" => Ok(Self::Transactional),
            other => Err(SnapshotError::Configuration(format!(
                "invalid SNAPSHOT_REPLAY_MODE: {other} (expected isolated or transactional)"
            ))),
        }
    }
}

/// Replay tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Failure handling.
    pub mode: ReplayMode,
    /// Splitter used for text input.
    pub split_mode: SplitMode,
    /// Server-side `statement_timeout` applied to every statement.
    pub statement_timeout: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            mode: ReplayMode::default(),
            split_mode: SplitMode::default(),
            statement_timeout: Duration::from_secs(60),
        }
    }
}

/// A statement that failed during an isolated replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StatementFailure {
    /// Zero-based position of the statement.
    pub index: usize,
    /// Leading characters of the statement.
    pub preview: String,
    /// Database error message.
    pub message: String,
}

/// Outcome of a replay.
///
/// Row counts are the sum of affected rows reported by the inserts of
/// each entity. Rows skipped by `ON CONFLICT DO NOTHING` are not counted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReplayReport {
    /// Rows inserted or updated in `users`.
    pub users_restored: u64,
    /// Rows inserted in `posts`.
    pub posts_restored: u64,
    /// Statements in the input.
    pub statements_processed: usize,
    /// Statements that failed and were skipped.
    pub statements_failed: usize,
    /// Details of each failed statement.
    pub failures: Vec<StatementFailure>,
}

impl ReplayReport {
    fn record_success(&mut self, statement: &Statement, rows: u64) {
        match statement.restores() {
            Some(Entity::Users) => self.users_restored += rows,
            Some(Entity::Posts) => self.posts_restored += rows,
            None => {}
        }
    }

    fn record_failure(&mut self, index: usize, statement: &Statement, message: String) {
        self.statements_failed += 1;
        self.failures.push(StatementFailure {
            index,
            preview: statement.preview(FAILURE_PREVIEW_CHARS),
            message,
        });
    }

    /// `true` when every statement succeeded.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.statements_failed == 0
    }
}

/// Executes snapshot statements against a [`Database`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayEngine {
    options: ReplayOptions,
}

impl ReplayEngine {
    /// Creates an engine with the given options.
    #[must_use]
    pub const fn new(options: ReplayOptions) -> Self {
        Self { options }
    }

    /// Engine options.
    #[must_use]
    pub const fn options(&self) -> ReplayOptions {
        self.options
    }

    /// Splits `text` with the configured splitter, classifies each
    /// fragment and replays the result.
    ///
    /// # Errors
    ///
    /// See [`ReplayEngine::replay`].
    pub async fn replay_sql(
        &self,
        db: &Database,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ReplayReport, SnapshotError> {
        let statements: Vec<Statement> = split(text, self.options.split_mode)
            .into_iter()
            .map(Statement::classify)
            .collect();
        self.replay(db, &statements, cancel).await
    }

    /// Replays statements in order on one connection.
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::Connectivity`] if no connection can be obtained or
    ///   session setup fails.
    /// - [`SnapshotError::StatementExecution`] in transactional mode when a
    ///   statement fails; nothing is committed.
    /// - [`SnapshotError::Timeout`] / [`SnapshotError::Cancelled`] when
    ///   replay is interrupted. Statements already committed in isolated
    ///   mode stay applied.
    pub async fn replay(
        &self,
        db: &Database,
        statements: &[Statement],
        cancel: &CancellationToken,
    ) -> Result<ReplayReport, SnapshotError> {
        let mut conn =
            bounded("connection acquire", self.client_timeout(), cancel, db.acquire()).await?;

        let set_timeout = format!(
            "SET statement_timeout = {}",
            self.options.statement_timeout.as_millis()
        );
        (&mut *conn)
            .execute(sqlx::raw_sql(&set_timeout))
            .await
            .map_err(SnapshotError::connectivity)?;

        tracing::info!(
            statements = statements.len(),
            mode = ?self.options.mode,
            "replaying snapshot"
        );

        let result = match self.options.mode {
            ReplayMode::Isolated => self.run_isolated(&mut conn, statements, cancel).await,
            ReplayMode::Transactional => {
                self.run_transactional(&mut conn, statements, cancel).await
            }
        };

        match &result {
            Err(e) if is_interrupted(e) => conn.close_on_drop(),
            _ => {
                if let Err(e) = (&mut *conn)
                    .execute(sqlx::raw_sql("RESET statement_timeout"))
                    .await
                {
                    tracing::warn!(error = %e, "failed to reset statement_timeout");
                    conn.close_on_drop();
                }
            }
        }

        match &result {
            Ok(report) => tracing::info!(
                users_restored = report.users_restored,
                posts_restored = report.posts_restored,
                statements_processed = report.statements_processed,
                statements_failed = report.statements_failed,
                "snapshot replay finished"
            ),
            Err(e) => tracing::error!(error = %e, "snapshot replay aborted"),
        }
        result
    }

    /// Client-side wait per round-trip. A zero `statement_timeout`
    /// disables the server limit, so the client waits without one too.
    fn client_timeout(&self) -> Duration {
        if self.options.statement_timeout.is_zero() {
            Duration::ZERO
        } else {
            self.options.statement_timeout + CLIENT_TIMEOUT_SLACK
        }
    }

    async fn run_isolated(
        &self,
        conn: &mut PgConnection,
        statements: &[Statement],
        cancel: &CancellationToken,
    ) -> Result<ReplayReport, SnapshotError> {
        let mut report = ReplayReport {
            statements_processed: statements.len(),
            ..ReplayReport::default()
        };

        for (index, statement) in statements.iter().enumerate() {
            match self.execute(conn, statement, cancel).await {
                Ok(rows) => report.record_success(statement, rows),
                Err(e) if is_interrupted(&e) => return Err(e),
                Err(e) => {
                    let message = failure_message(e);
                    tracing::warn!(
                        index,
                        statement = %statement.preview(FAILURE_PREVIEW_CHARS),
                        error = %message,
                        "statement failed, continuing"
                    );
                    report.record_failure(index, statement, message);
                }
            }
        }
        Ok(report)
    }

    async fn run_transactional(
        &self,
        conn: &mut PgConnection,
        statements: &[Statement],
        cancel: &CancellationToken,
    ) -> Result<ReplayReport, SnapshotError> {
        let mut report = ReplayReport {
            statements_processed: statements.len(),
            ..ReplayReport::default()
        };

        let mut tx = conn.begin().await.map_err(SnapshotError::connectivity)?;
        for (index, statement) in statements.iter().enumerate() {
            match self.execute(&mut tx, statement, cancel).await {
                Ok(rows) => report.record_success(statement, rows),
                Err(e) if is_interrupted(&e) => return Err(e),
                Err(e) => {
                    let message = failure_message(e);
                    tracing::warn!(
                        index,
                        statement = %statement.preview(FAILURE_PREVIEW_CHARS),
                        error = %message,
                        "statement failed, rolling back"
                    );
                    if let Err(rollback) = tx.rollback().await {
                        tracing::warn!(error = %rollback, "rollback failed");
                    }
                    return Err(SnapshotError::StatementExecution { index, message });
                }
            }
        }
        tx.commit().await.map_err(SnapshotError::connectivity)?;
        Ok(report)
    }

    async fn execute(
        &self,
        conn: &mut PgConnection,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<u64, SnapshotError> {
        let result = bounded("statement", self.client_timeout(), cancel, async move {
            conn.execute(sqlx::raw_sql(statement.sql()))
                .await
                .map_err(|e| SnapshotError::Internal(e.to_string()))
        })
        .await?;

        tracing::debug!(
            statement = %statement.preview(DEBUG_PREVIEW_CHARS),
            rows = result.rows_affected(),
            "statement executed"
        );
        Ok(result.rows_affected())
    }
}

fn failure_message(err: SnapshotError) -> String {
    match err {
        SnapshotError::Internal(message) => message,
        other => other.to_string(),
    }
}
