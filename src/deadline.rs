//! Bounded waiting for blocking steps.
//!
//! Every database round-trip and external process run in the subsystem goes
//! through [`bounded`], which races the work against a timeout and a
//! [`CancellationToken`].

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::SnapshotError;

/// Runs `fut` until it completes, `limit` elapses or `cancel` fires.
///
/// A zero `limit` waits without a deadline, the same way PostgreSQL treats
/// `statement_timeout = 0`.
///
/// # Errors
///
/// Returns the future's own error, [`SnapshotError::Timeout`] when the
/// limit elapses first, or [`SnapshotError::Cancelled`] when the token is
/// cancelled first. In both of the latter cases `fut` is dropped.
pub async fn bounded<T, F>(
    operation: &str,
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, SnapshotError>
where
    F: Future<Output = Result<T, SnapshotError>>,
{
    let timed = async {
        if limit.is_zero() {
            return fut.await;
        }
        match tokio::time::timeout(limit, fut).await {
            Ok(inner) => inner,
            Err(_) => Err(SnapshotError::Timeout {
                operation: operation.to_string(),
                after_secs: limit.as_secs(),
            }),
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SnapshotError::Cancelled),
        outcome = timed => outcome,
    }
}

/// Whether `err` means the work was abandoned mid-flight, leaving any
/// connection it used in an unknown state.
#[must_use]
pub const fn is_interrupted(err: &SnapshotError) -> bool {
    matches!(err, SnapshotError::Timeout { .. } | SnapshotError::Cancelled)
}
