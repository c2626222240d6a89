//! Connection handles shared between socket tasks and the session actor.
//!
//! Each socket gets a writer task that drains an [`OutboundRx`]. The session
//! only ever holds the [`ConnHandle`] end, so it can queue frames or request a
//! close without touching the socket itself.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::Serialize;
use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    pub fn next() -> Self {
        Self(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    Telephony,
    Observer,
    Model,
}

impl fmt::Display for ConnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnKind::Telephony => write!(f, "telephony"),
            ConnKind::Observer => write!(f, "observer"),
            ConnKind::Model => write!(f, "model"),
        }
    }
}

/// What a writer task is asked to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("{kind} connection {id} is closed")]
    Closed { kind: ConnKind, id: ConnId },
    #[error("{kind} connection {id} is not keeping up; frame dropped")]
    Full { kind: ConnKind, id: ConnId },
    #[error("failed to encode outbound frame: {0}")]
    Encode(String),
}

/// The session's end of a connection.
#[derive(Clone)]
pub struct ConnHandle {
    id: ConnId,
    kind: ConnKind,
    tx: mpsc::Sender<Outbound>,
    closed: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
}

impl fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("open", &self.is_open())
            .finish()
    }
}

impl ConnHandle {
    /// Creates a handle with a freshly allocated id plus the receiving end
    /// its writer task should drain.
    pub fn channel(kind: ConnKind, depth: usize) -> (Self, OutboundRx) {
        Self::open(ConnId::next(), kind, depth)
    }

    /// Like [`ConnHandle::channel`], for an id allocated up front.
    pub fn open(id: ConnId, kind: ConnKind, depth: usize) -> (Self, OutboundRx) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let closed = Arc::new(AtomicBool::new(false));
        let close_signal = Arc::new(Notify::new());
        let handle = Self {
            id,
            kind,
            tx,
            closed: closed.clone(),
            close_signal: close_signal.clone(),
        };
        let rx = OutboundRx {
            rx,
            closed,
            close_signal,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn kind(&self) -> ConnKind {
        self.kind
    }

    /// False once a close was requested or the writer task has gone away.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    pub async fn send_text(&self, text: String) -> Result<(), SendError> {
        let closed = SendError::Closed {
            kind: self.kind,
            id: self.id,
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(closed);
        }
        self.tx.send(Outbound::Text(text)).await.map_err(|_| closed)
    }

    /// Queues a frame without waiting. A full queue rejects the frame
    /// instead of blocking the caller.
    pub fn try_send_text(&self, text: String) -> Result<(), SendError> {
        let (kind, id) = (self.kind, self.id);
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed { kind, id });
        }
        self.tx
            .try_send(Outbound::Text(text))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::Full { kind, id },
                mpsc::error::TrySendError::Closed(_) => SendError::Closed { kind, id },
            })
    }

    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SendError> {
        let text = serde_json::to_string(value).map_err(|e| SendError::Encode(e.to_string()))?;
        self.send_text(text).await
    }

    /// Asks the writer to close the socket. Frames already queued are flushed
    /// first; anything sent afterwards is rejected.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(conn = %self.id, kind = %self.kind, "Closing connection");
            self.close_signal.notify_one();
        }
    }
}

/// The writer task's end of a connection.
pub struct OutboundRx {
    rx: mpsc::Receiver<Outbound>,
    closed: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
}

impl OutboundRx {
    /// Waits for the next frame. Yields [`Outbound::Close`] once the handle
    /// was closed and the queue is drained, even if every handle is gone by
    /// then. `None` means the handles were dropped without a close.
    pub async fn recv(&mut self) -> Option<Outbound> {
        if self.closed.load(Ordering::Acquire) {
            return Some(self.rx.try_recv().unwrap_or(Outbound::Close));
        }
        tokio::select! {
            biased;
            msg = self.rx.recv() => match msg {
                None if self.closed.load(Ordering::Acquire) => Some(Outbound::Close),
                other => other,
            },
            _ = self.close_signal.notified() => Some(self.rx.try_recv().unwrap_or(Outbound::Close)),
        }
    }

    /// Non-blocking variant of [`OutboundRx::recv`].
    pub fn try_recv(&mut self) -> Option<Outbound> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(_) if self.closed.load(Ordering::Acquire) => Some(Outbound::Close),
            Err(_) => None,
        }
    }
}

/// Pumps one accepted WebSocket until either direction ends.
///
/// Text frames are handed to `on_text` in arrival order. The writer half
/// drains `outbound` and closes the socket on [`Outbound::Close`].
pub async fn serve_socket<F, Fut>(socket: WebSocket, outbound: OutboundRx, mut on_text: F)
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_to_client(sink, outbound));

    let reader = async {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => on_text(text.to_string()).await,
                Ok(Message::Close(_)) => {
                    debug!("Peer sent close frame");
                    break;
                }
                Ok(Message::Binary(_)) => debug!("Ignoring binary frame"),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => {
                    warn!(error = %e, "WebSocket read failed");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = reader => {},
        _ = &mut writer => debug!("Writer finished before reader"),
    }
    writer.abort();
}

async fn write_to_client(mut sink: SplitSink<WebSocket, Message>, mut outbound: OutboundRx) {
    while let Some(msg) = outbound.recv().await {
        match msg {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "WebSocket write failed");
                    return;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_and_receive_in_order() {
        let (conn, mut rx) = ConnHandle::channel(ConnKind::Telephony, 4);
        conn.send_text("one".to_string()).await.unwrap();
        conn.send_json(&json!({"n": 2})).await.unwrap();

        assert_eq!(rx.recv().await, Some(Outbound::Text("one".to_string())));
        assert_eq!(rx.recv().await, Some(Outbound::Text(r#"{"n":2}"#.to_string())));
        assert_eq!(rx.try_recv(), None);
    }

    #[tokio::test]
    async fn test_close_flushes_queue_then_rejects_sends() {
        let (conn, mut rx) = ConnHandle::channel(ConnKind::Model, 4);
        conn.send_text("queued".to_string()).await.unwrap();
        conn.close();

        assert!(!conn.is_open());
        assert!(matches!(
            conn.send_text("late".to_string()).await,
            Err(SendError::Closed {
                kind: ConnKind::Model,
                ..
            })
        ));
        assert_eq!(rx.recv().await, Some(Outbound::Text("queued".to_string())));
        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_writer() {
        let (conn, mut rx) = ConnHandle::channel(ConnKind::Observer, 4);
        let waiter = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;
        conn.close();
        assert_eq!(waiter.await.unwrap(), Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_close_then_drop_still_delivers_close() {
        let (conn, mut rx) = ConnHandle::channel(ConnKind::Telephony, 4);
        let waiter = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;
        conn.close();
        drop(conn);
        assert_eq!(waiter.await.unwrap(), Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_drop_without_close_ends_stream() {
        let (conn, mut rx) = ConnHandle::channel(ConnKind::Telephony, 4);
        drop(conn);
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_try_send_rejects_when_full() {
        let (conn, mut rx) = ConnHandle::channel(ConnKind::Observer, 1);
        conn.try_send_text("first".to_string()).unwrap();
        assert!(matches!(
            conn.try_send_text("second".to_string()),
            Err(SendError::Full {
                kind: ConnKind::Observer,
                ..
            })
        ));
        assert!(conn.is_open());
        assert_eq!(rx.try_recv(), Some(Outbound::Text("first".to_string())));
        conn.try_send_text("third".to_string()).unwrap();

        conn.close();
        assert!(matches!(
            conn.try_send_text("late".to_string()),
            Err(SendError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_writer_marks_handle_closed() {
        let (conn, rx) = ConnHandle::channel(ConnKind::Telephony, 4);
        assert!(conn.is_open());
        drop(rx);
        assert!(!conn.is_open());
        assert!(conn.send_text("x".to_string()).await.is_err());
    }

    #[test]
    fn test_conn_ids_are_unique() {
        let a = ConnId::next();
        let b = ConnId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }
}
