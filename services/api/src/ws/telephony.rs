//! Telephony ingress: the call leg's media-stream socket.

use super::connection::{ConnHandle, ConnKind, serve_socket};
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use std::sync::Arc;
use tracing::{Span, info, instrument};

const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Upgrades `GET /call` to the media-stream socket.
pub async fn call_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| accept_call(socket, state))
}

/// Serves one call leg until it disconnects.
///
/// Attaching replaces any call leg already in the session. Frames are
/// decoded here and applied by the session actor in arrival order.
#[instrument(name = "call_leg", skip_all, fields(conn))]
async fn accept_call(socket: WebSocket, state: Arc<AppState>) {
    let (conn, outbound) = ConnHandle::channel(ConnKind::Telephony, OUTBOUND_QUEUE_DEPTH);
    let id = conn.id();
    Span::current().record("conn", id.get());
    info!("Call leg connected");

    let session = state.session.clone();
    session
        .attach_telephony(conn, state.config.openai_api_key.clone())
        .await;

    serve_socket(socket, outbound, |text| {
        let session = session.clone();
        async move { session.telephony_text(id, &text).await }
    })
    .await;

    session.detach_telephony(id).await;
    info!("Call leg socket closed");
}
