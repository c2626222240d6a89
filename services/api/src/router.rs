//! Axum Router Configuration
//!
//! HTTP routes, the two WebSocket endpoints and the OpenAPI documentation.

use crate::{
    handlers,
    models::{ErrorResponse, PublicUrlResponse, ToolDescriptor},
    state::AppState,
    ws::{
        call_handler, observer_handler,
        session::{ModelState, SessionSnapshot},
    },
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::public_url,
        handlers::list_tools,
        handlers::session_status,
    ),
    components(
        schemas(PublicUrlResponse, ToolDescriptor, SessionSnapshot, ModelState, ErrorResponse)
    ),
    tags(
        (name = "Callbridge API", description = "Realtime voice relay between a phone call and a speech model")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/", get(handlers::health))
        .route("/public-url", get(handlers::public_url))
        .route("/tools", get(handlers::list_tools))
        .route("/session", get(handlers::session_status))
        .route("/call", get(call_handler))
        .route("/logs", get(observer_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_http_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in ["/", "/public-url", "/tools", "/session"] {
            assert!(paths.contains(&expected), "missing path {}", expected);
        }
    }
}
