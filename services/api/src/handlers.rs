//! Axum Handlers for the HTTP API
//!
//! Read-only endpoints next to the two WebSocket routes. Documented with
//! `utoipa` so the OpenAPI document stays in sync.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, warn};

use crate::{
    models::{ErrorResponse, PublicUrlResponse, ToolDescriptor},
    state::AppState,
    ws::session::SessionSnapshot,
};

pub enum ApiError {
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unavailable(message) => {
                error!("Service unavailable: {}", message);
                (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

/// Liveness check.
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Server is running", body = String)
    )
)]
pub async fn health() -> &'static str {
    "Call relay server is running"
}

/// The public URL the telephony provider should reach this server on.
#[utoipa::path(
    get,
    path = "/public-url",
    responses(
        (status = 200, description = "Configured public URL, empty if unset", body = PublicUrlResponse)
    )
)]
pub async fn public_url(State(state): State<Arc<AppState>>) -> Json<PublicUrlResponse> {
    Json(PublicUrlResponse {
        public_url: state.config.public_url.clone().unwrap_or_default(),
    })
}

/// Functions the model may call.
///
/// A dispatcher that cannot list its functions yields an empty list.
#[utoipa::path(
    get,
    path = "/tools",
    responses(
        (status = 200, description = "Available functions", body = [ToolDescriptor])
    )
)]
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<ToolDescriptor>> {
    match state.dispatcher.schemas().await {
        Ok(schemas) => Json(schemas.into_iter().map(ToolDescriptor::from).collect()),
        Err(e) => {
            warn!(error = %e, "Could not list functions");
            Json(Vec::new())
        }
    }
}

/// Current state of the relayed call.
#[utoipa::path(
    get,
    path = "/session",
    responses(
        (status = 200, description = "Session state", body = SessionSnapshot),
        (status = 503, description = "Session actor is not running", body = ErrorResponse)
    )
)]
pub async fn session_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let snapshot = state
        .session
        .snapshot()
        .await
        .ok_or_else(|| ApiError::Unavailable("Session actor is not running".to_string()))?;
    Ok(Json(snapshot))
}
