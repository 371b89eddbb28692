//! HTTP layer: route handlers, DTOs, OpenAPI and router composition.
//!
//! Admin endpoints live under `/api/admin`; `/health` and the API
//! documentation are mounted at the root.

pub mod dto;
pub mod handlers;
pub mod openapi;

use axum::Router;

use crate::app_state::AppState;

/// Builds the complete router with every endpoint.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .merge(handlers::routes())
        .merge(openapi::routes())
}
