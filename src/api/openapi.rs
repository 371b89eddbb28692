//! OpenAPI document and the optional Swagger UI.

use axum::Router;
use utoipa::OpenApi;

use crate::api::dto::{RestoreForm, RestoreResponse};
use crate::api::handlers::{admin, system};
use crate::app_state::AppState;
use crate::error::{ErrorBody, ErrorResponse};

/// Path of the generated OpenAPI document.
pub const OPENAPI_PATH: &str = "/api-docs/openapi.json";

/// OpenAPI description of every HTTP endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "phosphor-snapshot",
        description = "Database snapshot download and replay for Phosphor Vibe Post"
    ),
    paths(
        system::health_handler,
        admin::download_backup,
        admin::restore_backup,
    ),
    components(schemas(
        system::HealthResponse,
        RestoreForm,
        RestoreResponse,
        ErrorResponse,
        ErrorBody,
    )),
    tags(
        (name = "System", description = "Service health"),
        (name = "Admin", description = "Token-gated snapshot download and restore"),
    )
)]
pub struct ApiDoc;

/// Serves the OpenAPI document, plus Swagger UI at `/swagger-ui` when the
/// `swagger-ui` feature is enabled.
#[cfg(feature = "swagger-ui")]
pub fn routes() -> Router<AppState> {
    Router::new().merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui").url(OPENAPI_PATH, ApiDoc::openapi()),
    )
}

/// Serves the OpenAPI document.
#[cfg(not(feature = "swagger-ui"))]
pub fn routes() -> Router<AppState> {
    use axum::Json;
    use axum::routing::get;

    Router::new().route(
        OPENAPI_PATH,
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}
