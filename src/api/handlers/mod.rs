//! REST endpoint handlers organized by resource.

pub mod admin;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes the admin and system routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(admin::routes())
        .merge(system::routes())
}
