//! WebSocket link to the OpenAI Realtime API.

use super::{KeepaliveConfig, ModelConnector};
use crate::ws::{
    connection::{ConnHandle, ConnId, ConnKind, Outbound, OutboundRx},
    manager::SessionHandle,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::{
    net::TcpStream,
    sync::watch,
    task::JoinHandle,
    time::{Instant, interval_at, sleep_until, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        protocol::{Message as WsMessage, WebSocketConfig},
    },
};
use tracing::{Instrument, debug, info, info_span, warn};

type ModelSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct RealtimeConnector {
    url: String,
    keepalive: KeepaliveConfig,
}

impl RealtimeConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            keepalive: KeepaliveConfig::default(),
        }
    }

    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }
}

#[async_trait]
impl ModelConnector for RealtimeConnector {
    async fn connect(
        &self,
        id: ConnId,
        credential: Arc<SecretString>,
        session: SessionHandle,
    ) -> Result<ConnHandle> {
        let mut request = self.url.as_str().into_client_request()?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", credential.expose_secret()).parse()?,
        );
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse()?);

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.keepalive.max_message_size);
        ws_config.max_frame_size = Some(self.keepalive.max_message_size);

        let (ws_stream, _) = connect_async_with_config(request, Some(ws_config), false)
            .await
            .context("Failed to connect to OpenAI Realtime WebSocket")?;
        info!(conn = %id, "Connected to OpenAI Realtime API.");

        let (sink, stream) = ws_stream.split();
        let (handle, outbound) = ConnHandle::open(id, ConnKind::Model, self.keepalive.queue_depth);
        let (pong_tx, pong_rx) = watch::channel(Instant::now());

        let span = info_span!("model_link", conn = %id);
        let reader = tokio::spawn(read_loop(stream, id, session.clone(), pong_tx).instrument(span.clone()));
        tokio::spawn(
            write_loop(
                sink,
                outbound,
                reader,
                pong_rx,
                self.keepalive.clone(),
                id,
                session,
            )
            .instrument(span),
        );

        Ok(handle)
    }
}

/// Forwards inbound text to the session and reports pongs to the writer.
async fn read_loop(
    mut stream: SplitStream<ModelSocket>,
    id: ConnId,
    session: SessionHandle,
    pong_tx: watch::Sender<Instant>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => session.model_text(id, text.to_string()).await,
            Ok(WsMessage::Pong(_)) => {
                let _ = pong_tx.send(Instant::now());
            }
            Ok(WsMessage::Close(frame)) => {
                info!(?frame, "Model closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Model socket read failed");
                break;
            }
        }
    }
}

/// Drains the outbound queue, keeps the link alive and owns teardown.
///
/// Ends when the session closes the handle, the reader finishes, a write
/// fails or a ping goes unanswered past the pong deadline. Always reports
/// the link as detached.
async fn write_loop(
    mut sink: SplitSink<ModelSocket, WsMessage>,
    mut outbound: OutboundRx,
    mut reader: JoinHandle<()>,
    mut pong_rx: watch::Receiver<Instant>,
    keepalive: KeepaliveConfig,
    id: ConnId,
    session: SessionHandle,
) {
    let mut ping = interval_at(
        Instant::now() + keepalive.ping_interval,
        keepalive.ping_interval,
    );
    let mut pong_deadline: Option<Instant> = None;
    let mut reader_done = false;
    let mut closing = false;

    loop {
        let deadline = pong_deadline;
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                        warn!(error = %e, "Model socket write failed");
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    closing = true;
                    break;
                }
            },
            _ = ping.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Bytes::new())).await {
                    warn!(error = %e, "Model ping failed");
                    break;
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + keepalive.pong_timeout);
                }
            },
            _ = async {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                warn!("Model did not answer ping in time");
                break;
            },
            changed = pong_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                pong_deadline = None;
            },
            _ = &mut reader => {
                reader_done = true;
                break;
            },
        }
    }

    let _ = sink.close().await;
    if closing && !reader_done {
        if timeout(keepalive.close_timeout, &mut reader).await.is_err() {
            debug!("Model did not complete the close handshake in time");
        }
    }
    reader.abort();
    info!("Model link closed");
    session.detach_model(id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::manager::SessionEvent;
    use std::time::Duration;
    use tokio::{net::TcpListener, sync::mpsc, sync::oneshot};
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("session channel closed")
    }

    #[tokio::test]
    async fn test_realtime_link_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (headers_tx, headers_rx) = oneshot::channel();
        let (received_tx, received_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| {
                let auth = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let beta = req
                    .headers()
                    .get("openai-beta")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let _ = headers_tx.send((auth, beta));
                Ok::<Response, ErrorResponse>(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            ws.send(WsMessage::Text(
                r#"{"type":"session.created"}"#.to_string().into(),
            ))
                .await
                .unwrap();
            let mut received_tx = Some(received_tx);
            while let Some(Ok(msg)) = ws.next().await {
                if let WsMessage::Text(text) = msg {
                    if let Some(tx) = received_tx.take() {
                        let _ = tx.send(text.to_string());
                    }
                }
            }
        });

        let (events_tx, mut events_rx) = mpsc::channel(16);
        let session = SessionHandle::from_sender(events_tx);
        let id = ConnId::next();
        let connector = RealtimeConnector::new(format!("ws://{}", addr));
        let handle = connector
            .connect(id, Arc::new(SecretString::from("sk-test".to_string())), session)
            .await
            .unwrap();

        let (auth, beta) = headers_rx.await.unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
        assert_eq!(beta.as_deref(), Some("realtime=v1"));

        match next_event(&mut events_rx).await {
            SessionEvent::ModelFrame { conn, text } => {
                assert_eq!(conn, id);
                assert_eq!(text, r#"{"type":"session.created"}"#);
            }
            other => panic!("Expected ModelFrame, got {:?}", other),
        }

        handle
            .send_text(r#"{"type":"response.create"}"#.to_string())
            .await
            .unwrap();
        assert_eq!(received_rx.await.unwrap(), r#"{"type":"response.create"}"#);

        handle.close();
        match next_event(&mut events_rx).await {
            SessionEvent::ModelDetached { conn } => assert_eq!(conn, id),
            other => panic!("Expected ModelDetached, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (events_tx, _events_rx) = mpsc::channel(4);
        let connector = RealtimeConnector::new(format!("ws://{}", addr));
        let result = connector
            .connect(
                ConnId::next(),
                Arc::new(SecretString::from("sk-test".to_string())),
                SessionHandle::from_sender(events_tx),
            )
            .await;
        assert!(result.is_err());
    }
}
