//! Request and response bodies for the admin snapshot endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::snapshot::ReplayReport;

/// Query string accepted by `GET /api/admin/backup`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TokenQuery {
    /// Admin backup token. May be sent as `X-Backup-Token` instead.
    pub token: Option<String>,
}

/// Multipart form accepted by `POST /api/admin/restore`.
///
/// Documentation only; the handler reads the parts as a stream.
#[derive(Debug, ToSchema)]
pub struct RestoreForm {
    /// Admin backup token. May be sent as `X-Backup-Token` instead.
    pub token: Option<String>,
    /// Snapshot file (`.sql`, at most 10 MiB, UTF-8).
    #[schema(value_type = String, format = Binary)]
    pub backup: Vec<u8>,
}

/// Successful restore summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResponse {
    /// Always `true`; failures use the error body.
    pub success: bool,
    /// Rows inserted or updated in `users`.
    pub users_restored: u64,
    /// Rows inserted in `posts`.
    pub posts_restored: u64,
    /// Statements found in the upload.
    pub statements_processed: usize,
    /// Statements that failed and were skipped.
    pub statements_failed: usize,
}

impl From<&ReplayReport> for RestoreResponse {
    fn from(report: &ReplayReport) -> Self {
        Self {
            success: true,
            users_restored: report.users_restored,
            posts_restored: report.posts_restored,
            statements_processed: report.statements_processed,
            statements_failed: report.statements_failed,
        }
    }
}
