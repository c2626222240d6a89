//! Observer broadcast: a monitoring socket that sees every model event.

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

const OUTBOUND_QUEUE_DEPTH: usize = 512;

/// Upgrades `GET /logs` to the observer socket.
pub async fn observer_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| accept_observer(socket, state))
}

#[instrument(name = "observer", skip_all, fields(conn))]
async fn accept_observer(socket: WebSocket, state: Arc<AppState>) {
    let (conn, outbound) = ConnHandle::channel(ConnKind::Observer, OUTBOUND_QUEUE_DEPTH);
    let id = conn.id();
    Span::current().record("conn", id.get());
    info!("Observer connected");

    let session = state.session.clone();
    session.attach_observer(conn).await;

    serve_socket(socket, outbound, |text| {
        let session = session.clone();
        async move { session.observer_text(id, &text).await }
    })
    .await;

    session.detach_observer(id).await;
    info!("Observer socket closed");
}
