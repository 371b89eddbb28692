//! Admin snapshot handlers: token-gated download and upload/replay.
//!
//! Both endpoints check the shared secret before touching the database or
//! the upload; a missing or wrong token yields `401` with no other effect.

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{RestoreResponse, TokenQuery};
use crate::app_state::AppState;
use crate::config::MAX_UPLOAD_BYTES;
use crate::error::{ErrorResponse, SnapshotError};

/// Header carrying the admin token.
pub const TOKEN_HEADER: &str = "x-backup-token";

/// Multipart framing allowance on top of the file cap.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Content types accepted for an uploaded snapshot.
const ACCEPTED_CONTENT_TYPES: [&str; 5] = [
    "application/sql",
    "application/x-sql",
    "text/sql",
    "text/x-sql",
    "text/plain",
];

/// `GET /api/admin/backup`: Download a logical snapshot.
///
/// # Errors
///
/// Returns [`SnapshotError::Unauthorized`] on a missing or wrong token, or
/// a server error if the snapshot cannot be generated.
#[utoipa::path(
    get,
    path = "/api/admin/backup",
    tag = "Admin",
    summary = "Download database snapshot",
    description = "Generates a replayable SQL snapshot of users and posts and returns it as an attachment.",
    params(
        TokenQuery,
        ("X-Backup-Token" = Option<String>, Header, description = "Admin backup token"),
    ),
    responses(
        (status = 200, description = "Snapshot file", content_type = "application/sql", body = String),
        (status = 401, description = "Invalid backup token", body = ErrorResponse),
        (status = 500, description = "Snapshot generation failed", body = ErrorResponse),
    )
)]
pub async fn download_backup(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Response, SnapshotError> {
    let presented = query.token.as_deref().or_else(|| header_token(&headers));
    authorize(state.admin_token(), presented)?;

    let snapshot = state.generator.generate(&state.db, &state.shutdown).await?;
    let stats = snapshot.stats();
    let disposition = format!("attachment; filename=\"{}\"", snapshot.file_name());

    let mut response = snapshot.into_sql().into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/sql"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(stats.bytes));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).map_err(|e| SnapshotError::Internal(e.to_string()))?,
    );
    headers.insert("x-backup-users", HeaderValue::from(stats.users));
    headers.insert("x-backup-posts", HeaderValue::from(stats.posts));
    headers.insert("x-backup-size", HeaderValue::from(stats.bytes));

    tracing::info!(
        users = stats.users,
        posts = stats.posts,
        bytes = stats.bytes,
        "snapshot downloaded"
    );
    Ok(response)
}

/// `POST /api/admin/restore`: Replay an uploaded snapshot.
///
/// # Errors
///
/// Returns [`SnapshotError::Unauthorized`] on a missing or wrong token,
/// [`SnapshotError::Validation`] for a missing, oversized, mistyped or
/// non-UTF-8 file, or a server error if replay cannot run.
#[utoipa::path(
    post,
    path = "/api/admin/restore",
    tag = "Admin",
    summary = "Restore database snapshot",
    description = "Replays an uploaded SQL snapshot statement by statement. Failing statements are skipped and counted.",
    params(
        ("X-Backup-Token" = Option<String>, Header, description = "Admin backup token"),
    ),
    request_body(content = crate::api::dto::RestoreForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Snapshot replayed", body = RestoreResponse),
        (status = 400, description = "Invalid upload", body = ErrorResponse),
        (status = 401, description = "Invalid backup token", body = ErrorResponse),
        (status = 500, description = "Replay failed", body = ErrorResponse),
    )
)]
pub async fn restore_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<impl IntoResponse, SnapshotError> {
    let (form, read_error) = read_form(multipart).await;

    let presented = form.token.as_deref().or_else(|| header_token(&headers));
    authorize(state.admin_token(), presented)?;
    if let Some(e) = read_error {
        return Err(e);
    }

    let file = form
        .backup
        .ok_or_else(|| SnapshotError::Validation("no backup file provided".into()))?;
    let text = file.validate()?;

    tracing::info!(
        file = file.file_name.as_deref().unwrap_or("-"),
        bytes = file.bytes.len(),
        "replaying uploaded snapshot"
    );
    let report = state.replay.replay_sql(&state.db, text, &state.shutdown).await?;

    Ok((StatusCode::OK, Json(RestoreResponse::from(&report))))
}

/// Admin routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/backup", get(download_backup))
        .route(
            "/api/admin/restore",
            post(restore_backup)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD_BYTES)),
        )
}

/// Compares the presented token with the configured one.
///
/// Rejects everything when no token is configured. The comparison time
/// does not depend on where the first mismatching byte is.
fn authorize(expected: Option<&str>, presented: Option<&str>) -> Result<(), SnapshotError> {
    match (expected, presented) {
        (Some(expected), Some(presented)) if constant_time_eq(expected, presented) => Ok(()),
        _ => Err(SnapshotError::Unauthorized),
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn header_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Default)]
struct RestoreFormData {
    token: Option<String>,
    backup: Option<UploadedFile>,
}

#[derive(Debug)]
struct UploadedFile {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: axum::body::Bytes,
}

impl UploadedFile {
    /// Checks size, type and encoding, returning the snapshot text.
    fn validate(&self) -> Result<&str, SnapshotError> {
        if self.bytes.len() > MAX_UPLOAD_BYTES {
            return Err(SnapshotError::Validation(
                "backup file exceeds the 10 MiB limit".into(),
            ));
        }

        let content_type = self
            .content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty());
        let has_sql_name = self
            .file_name
            .as_deref()
            .is_some_and(|name| name.to_ascii_lowercase().ends_with(".sql"));

        let accepted = match content_type.as_deref() {
            Some(ct) if ACCEPTED_CONTENT_TYPES.contains(&ct) => true,
            None | Some("application/octet-stream") => has_sql_name,
            Some(_) => false,
        };
        if !accepted {
            return Err(SnapshotError::Validation("only .sql files are allowed".into()));
        }

        std::str::from_utf8(&self.bytes)
            .map_err(|_| SnapshotError::Validation("backup file is not valid UTF-8".into()))
    }
}

/// Reads every part of the form. A read failure is returned alongside
/// whatever was read before it, so the token can still be checked first.
async fn read_form(mut multipart: Multipart) -> (RestoreFormData, Option<SnapshotError>) {
    let mut form = RestoreFormData::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return (form, None),
            Err(e) => return (form, Some(upload_error(&e))),
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("token") => match field.text().await {
                Ok(token) => form.token = Some(token.trim().to_string()),
                Err(e) => return (form, Some(upload_error(&e))),
            },
            Some("backup") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                match field.bytes().await {
                    Ok(bytes) => {
                        form.backup = Some(UploadedFile {
                            file_name,
                            content_type,
                            bytes,
                        });
                    }
                    Err(e) => return (form, Some(upload_error(&e))),
                }
            }
            _ => {}
        }
    }
}

fn upload_error(err: &axum::extract::multipart::MultipartError) -> SnapshotError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        SnapshotError::Validation("backup file exceeds the 10 MiB limit".into())
    } else {
        SnapshotError::Validation(format!("malformed upload: {}", err.body_text()))
    }
}
