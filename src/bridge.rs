//! Physical dump and restore through the PostgreSQL client tools.
//!
//! [`DumpBridge`] shells out to `pg_dump` and `psql`. Each run is bounded
//! by the tool timeout and observes the cancellation token; the child is
//! spawned with `kill_on_drop`, so abandoning the wait kills it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::deadline::bounded;
use crate::error::SnapshotError;
use crate::persistence::{Database, DatabaseSettings};

/// Bytes of tool stderr kept in [`SnapshotError::ToolFailed`].
const STDERR_TAIL_BYTES: usize = 2048;

/// Dump bridge tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// `pg_dump` executable name or path.
    pub pg_dump: String,
    /// `psql` executable name or path.
    pub psql: String,
    /// Upper bound for one tool run.
    pub timeout: Duration,
    /// Upper bound for the connectivity probe before a restore.
    pub probe_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            pg_dump: "pg_dump".to_string(),
            psql: "psql".to_string(),
            timeout: Duration::from_secs(1800),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// A dump file written by [`DumpBridge::dump`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpArtifact {
    /// Where the dump was written.
    pub path: PathBuf,
    /// File size in bytes. Never zero.
    pub bytes: u64,
}

impl DumpArtifact {
    /// Size in KiB, for display.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn kilobytes(&self) -> f64 {
        self.bytes as f64 / 1024.0
    }
}

/// Runs `pg_dump` / `psql` against a connection string.
#[derive(Debug, Clone, Default)]
pub struct DumpBridge {
    options: BridgeOptions,
}

impl DumpBridge {
    /// Creates a bridge with the given options.
    #[must_use]
    pub const fn new(options: BridgeOptions) -> Self {
        Self { options }
    }

    /// Dumps the database at `url` to `output`, creating parent
    /// directories as needed. An existing file is overwritten.
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::Configuration`] if `url` is `None`; no process is
    ///   spawned.
    /// - [`SnapshotError::ToolUnavailable`] if `pg_dump` is not installed.
    /// - [`SnapshotError::ToolFailed`] on a non-zero exit.
    /// - [`SnapshotError::EmptyArtifact`] if the dump file is empty.
    /// - [`SnapshotError::Timeout`] / [`SnapshotError::Cancelled`].
    pub async fn dump(
        &self,
        url: Option<&str>,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<DumpArtifact, SnapshotError> {
        let url = require_url(url)?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!(path = %output.display(), "exporting database");
        let mut command = Command::new(&self.options.pg_dump);
        command
            .arg(format!("--dbname={url}"))
            .arg(format!("--file={}", output.display()));
        self.run(&self.options.pg_dump, command, cancel).await?;

        let bytes = match tokio::fs::metadata(output).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        if bytes == 0 {
            return Err(SnapshotError::EmptyArtifact(output.to_path_buf()));
        }

        let artifact = DumpArtifact {
            path: output.to_path_buf(),
            bytes,
        };
        tracing::info!(
            path = %artifact.path.display(),
            kilobytes = %format!("{:.2}", artifact.kilobytes()),
            "database backup completed"
        );
        Ok(artifact)
    }

    /// Probes `url` and then feeds `input` to `psql`.
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::Configuration`] if `url` is `None`.
    /// - [`SnapshotError::MissingArtifact`] if `input` does not exist.
    /// - [`SnapshotError::Connectivity`] if the probe fails.
    /// - [`SnapshotError::ToolUnavailable`] / [`SnapshotError::ToolFailed`]
    ///   for `psql` failures.
    /// - [`SnapshotError::Timeout`] / [`SnapshotError::Cancelled`].
    pub async fn restore(
        &self,
        url: Option<&str>,
        input: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SnapshotError> {
        let url = require_url(url)?;

        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(SnapshotError::MissingArtifact(input.to_path_buf()));
        }

        tracing::info!("testing connection to target database");
        bounded(
            "connection probe",
            self.options.probe_timeout,
            cancel,
            self.probe(url),
        )
        .await?;
        tracing::info!("connection to target database successful");

        tracing::info!(path = %input.display(), "restoring database");
        let mut command = Command::new(&self.options.psql);
        command
            .arg("--no-psqlrc")
            .arg(format!("--dbname={url}"))
            .arg(format!("--file={}", input.display()));
        self.run(&self.options.psql, command, cancel).await?;

        tracing::info!("database restore completed");
        Ok(())
    }

    /// Opens a one-shot single-connection pool, runs `SELECT 1` and
    /// closes it.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Connectivity`] on failure.
    pub async fn probe(&self, url: &str) -> Result<(), SnapshotError> {
        let db = Database::open(&DatabaseSettings::single(url, self.options.probe_timeout)).await?;
        let result = db.probe().await;
        db.close().await;
        result
    }

    async fn run(
        &self,
        tool: &str,
        mut command: Command,
        cancel: &CancellationToken,
    ) -> Result<(), SnapshotError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = bounded(tool, self.options.timeout, cancel, async {
            command.output().await.map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    SnapshotError::ToolUnavailable {
                        tool: tool.to_string(),
                    }
                } else {
                    SnapshotError::Io(e)
                }
            })
        })
        .await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("command not found") {
            return Err(SnapshotError::ToolUnavailable {
                tool: tool.to_string(),
            });
        }

        Err(SnapshotError::ToolFailed {
            tool: tool.to_string(),
            status: output.status.code(),
            stderr: tail(stderr.trim(), STDERR_TAIL_BYTES).to_string(),
        })
    }
}

fn require_url(url: Option<&str>) -> Result<&str, SnapshotError> {
    url.filter(|u| !u.trim().is_empty()).ok_or_else(|| {
        SnapshotError::Configuration("DATABASE_URL not found in environment variables".into())
    })
}

/// Last `max_bytes` of `text`, moved forward to a char boundary.
fn tail(text: &str, max_bytes: usize) -> &str {
    let mut start = text.len().saturating_sub(max_bytes);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text.get(start..).unwrap_or(text)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 10), "ab");
        assert_eq!(tail("éé", 3), "é");
    }

    #[test]
    fn artifact_reports_kilobytes() {
        let artifact = DumpArtifact {
            path: PathBuf::from("x.sql"),
            bytes: 2048,
        };
        assert!((artifact.kilobytes() - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn dump_without_url_spawns_nothing() {
        let bridge = DumpBridge::new(BridgeOptions {
            pg_dump: "/definitely/not/here/pg_dump".to_string(),
            ..BridgeOptions::default()
        });
        let result = bridge
            .dump(None, Path::new("unused.sql"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(SnapshotError::Configuration(_))));
    }

    #[tokio::test]
    async fn restore_without_dump_file_is_missing_artifact() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let path = dir.path().join("absent.sql");
        let result = DumpBridge::default()
            .restore(Some("postgres://x@127.0.0.1:1/x"), &path, &CancellationToken::new())
            .await;
        let Err(SnapshotError::MissingArtifact(reported)) = result else {
            panic!("expected MissingArtifact, got {result:?}");
        };
        assert_eq!(reported, path);
    }

    #[tokio::test]
    async fn missing_binary_is_tool_unavailable() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let bridge = DumpBridge::new(BridgeOptions {
            pg_dump: dir.path().join("pg_dump").display().to_string(),
            ..BridgeOptions::default()
        });
        let result = bridge
            .dump(
                Some("postgres://x@127.0.0.1:1/x"),
                &dir.path().join("out.sql"),
                &CancellationToken::new(),
            )
            .await;
        let Err(err) = result else {
            panic!("expected failure");
        };
        assert!(matches!(err, SnapshotError::ToolUnavailable { .. }));
        assert!(err.format_detailed().contains("postgresql-client"));
    }

    #[cfg(unix)]
    mod stubs {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn stub(dir: &Path, name: &str, body: &str) -> String {
            let path = dir.join(name);
            if std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).is_err() {
                panic!("write stub");
            }
            if std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).is_err() {
                panic!("chmod stub");
            }
            path.display().to_string()
        }

        const WRITE_FILE_ARG: &str = r#"for a in "$@"; do case "$a" in --file=*) printf '%s\n' '-- dump' > "${a#--file=}";; esac; done"#;

        fn bridge_with(pg_dump: String) -> DumpBridge {
            DumpBridge::new(BridgeOptions {
                pg_dump,
                ..BridgeOptions::default()
            })
        }

        #[tokio::test]
        async fn successful_dump_reports_size_and_creates_directories() {
            let Ok(dir) = tempfile::tempdir() else {
                panic!("tempdir");
            };
            let bridge = bridge_with(stub(dir.path(), "pg_dump", WRITE_FILE_ARG));
            let output = dir.path().join("backups").join("database-backup.sql");

            let result = bridge
                .dump(Some("postgres://src"), &output, &CancellationToken::new())
                .await;
            let Ok(artifact) = result else {
                panic!("dump failed: {result:?}");
            };
            assert_eq!(artifact.path, output);
            assert_eq!(artifact.bytes, 8);
        }

        #[tokio::test]
        async fn empty_dump_is_rejected() {
            let Ok(dir) = tempfile::tempdir() else {
                panic!("tempdir");
            };
            let body = r#"for a in "$@"; do case "$a" in --file=*) : > "${a#--file=}";; esac; done"#;
            let bridge = bridge_with(stub(dir.path(), "pg_dump", body));
            let output = dir.path().join("empty.sql");

            let result = bridge
                .dump(Some("postgres://src"), &output, &CancellationToken::new())
                .await;
            assert!(matches!(result, Err(SnapshotError::EmptyArtifact(p)) if p == output));
        }

        #[tokio::test]
        async fn non_zero_exit_carries_stderr() {
            let Ok(dir) = tempfile::tempdir() else {
                panic!("tempdir");
            };
            let bridge = bridge_with(stub(
                dir.path(),
                "pg_dump",
                "echo 'pg_dump: error: connection refused' >&2; exit 2",
            ));

            let result = bridge
                .dump(
                    Some("postgres://src"),
                    &dir.path().join("out.sql"),
                    &CancellationToken::new(),
                )
                .await;
            let Err(SnapshotError::ToolFailed {
                tool,
                status,
                stderr,
            }) = result
            else {
                panic!("expected ToolFailed, got {result:?}");
            };
            assert!(tool.ends_with("pg_dump"));
            assert_eq!(status, Some(2));
            assert_eq!(stderr, "pg_dump: error: connection refused");
        }

        #[tokio::test]
        async fn unix_socket_failure_is_tool_failed() {
            let Ok(dir) = tempfile::tempdir() else {
                panic!("tempdir");
            };
            let bridge = bridge_with(stub(
                dir.path(),
                "pg_dump",
                "echo 'pg_dump: error: connection to server on socket \"/var/run/postgresql/.s.PGSQL.5432\" failed: No such file or directory' >&2; exit 1",
            ));

            let result = bridge
                .dump(
                    Some("postgres:///app"),
                    &dir.path().join("out.sql"),
                    &CancellationToken::new(),
                )
                .await;
            let Err(err) = result else {
                panic!("expected failure");
            };
            let SnapshotError::ToolFailed { status, stderr, .. } = &err else {
                panic!("expected ToolFailed, got {err:?}");
            };
            assert_eq!(*status, Some(1));
            assert!(stderr.contains(".s.PGSQL.5432"));
            assert!(!err.format_detailed().contains("postgresql-client"));
        }

        #[tokio::test]
        async fn command_not_found_in_stderr_is_tool_unavailable() {
            let Ok(dir) = tempfile::tempdir() else {
                panic!("tempdir");
            };
            let bridge = bridge_with(stub(
                dir.path(),
                "pg_dump",
                "echo 'sh: pg_dump: command not found' >&2; exit 127",
            ));

            let result = bridge
                .dump(
                    Some("postgres://src"),
                    &dir.path().join("out.sql"),
                    &CancellationToken::new(),
                )
                .await;
            assert!(matches!(result, Err(SnapshotError::ToolUnavailable { .. })));
        }

        #[tokio::test]
        async fn slow_tool_times_out() {
            let Ok(dir) = tempfile::tempdir() else {
                panic!("tempdir");
            };
            let bridge = DumpBridge::new(BridgeOptions {
                pg_dump: stub(dir.path(), "pg_dump", "sleep 30"),
                timeout: Duration::from_millis(200),
                ..BridgeOptions::default()
            });

            let result = bridge
                .dump(
                    Some("postgres://src"),
                    &dir.path().join("out.sql"),
                    &CancellationToken::new(),
                )
                .await;
            assert!(matches!(result, Err(SnapshotError::Timeout { .. })));
        }

        #[tokio::test]
        async fn cancelled_before_start() {
            let Ok(dir) = tempfile::tempdir() else {
                panic!("tempdir");
            };
            let bridge = bridge_with(stub(dir.path(), "pg_dump", WRITE_FILE_ARG));
            let cancel = CancellationToken::new();
            cancel.cancel();

            let result = bridge
                .dump(Some("postgres://src"), &dir.path().join("out.sql"), &cancel)
                .await;
            assert!(matches!(result, Err(SnapshotError::Cancelled)));
        }
    }
}
