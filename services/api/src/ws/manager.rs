//! The session actor.
//!
//! One task owns the [`Session`]. The call leg, the observer, the model link
//! and function-call tasks all talk to it through a [`SessionHandle`], so
//! every read-modify-write of the session, including the barge-in math,
//! happens on that one task.

use super::{
    connection::{ConnHandle, ConnId, SendError},
    function_call,
    protocol::{
        ConversationItem, ModelCommand, ModelEvent, OutputItem, TelephonyCommand, TelephonyEvent,
        decode_observer_frame, session_update_payload,
    },
    provider::ModelConnector,
    relay,
    session::{ModelSlot, Session, SessionSnapshot},
};
use callbridge_core::FunctionDispatcher;
use secrecy::SecretString;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

const EVENT_QUEUE_DEPTH: usize = 256;

/// Everything the actor reacts to.
#[derive(Debug)]
pub enum SessionEvent {
    TelephonyAttached {
        conn: ConnHandle,
        credential: Arc<SecretString>,
    },
    TelephonyFrame {
        conn: ConnId,
        event: TelephonyEvent,
    },
    TelephonyDetached {
        conn: ConnId,
    },
    ObserverAttached {
        conn: ConnHandle,
    },
    ObserverFrame {
        conn: ConnId,
        frame: Value,
    },
    ObserverDetached {
        conn: ConnId,
    },
    ModelConnected {
        conn: ConnId,
        result: anyhow::Result<ConnHandle>,
    },
    ModelFrame {
        conn: ConnId,
        text: String,
    },
    ModelDetached {
        conn: ConnId,
    },
    FunctionOutput {
        conn: ConnId,
        call_id: String,
        output: String,
    },
    Inspect(oneshot::Sender<SessionSnapshot>),
}

/// Cloneable address of the session actor.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Wraps a raw event sender. Whoever holds the receiver plays the actor.
    pub fn from_sender(tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { tx }
    }

    async fn send(&self, event: SessionEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("Session actor is gone; dropping event");
        }
    }

    pub async fn attach_telephony(&self, conn: ConnHandle, credential: Arc<SecretString>) {
        self.send(SessionEvent::TelephonyAttached { conn, credential })
            .await;
    }

    /// Decodes one call-leg frame. Undecodable frames are logged and dropped.
    pub async fn telephony_text(&self, conn: ConnId, text: &str) {
        match TelephonyEvent::decode(text) {
            Ok(event) => self.send(SessionEvent::TelephonyFrame { conn, event }).await,
            Err(e) => warn!(conn = %conn, error = %e, "Dropping undecodable telephony frame"),
        }
    }

    pub async fn detach_telephony(&self, conn: ConnId) {
        self.send(SessionEvent::TelephonyDetached { conn }).await;
    }

    pub async fn attach_observer(&self, conn: ConnHandle) {
        self.send(SessionEvent::ObserverAttached { conn }).await;
    }

    pub async fn observer_text(&self, conn: ConnId, text: &str) {
        match decode_observer_frame(text) {
            Ok(frame) => self.send(SessionEvent::ObserverFrame { conn, frame }).await,
            Err(e) => warn!(conn = %conn, error = %e, "Dropping undecodable observer frame"),
        }
    }

    pub async fn detach_observer(&self, conn: ConnId) {
        self.send(SessionEvent::ObserverDetached { conn }).await;
    }

    pub async fn model_connected(&self, conn: ConnId, result: anyhow::Result<ConnHandle>) {
        self.send(SessionEvent::ModelConnected { conn, result }).await;
    }

    pub async fn model_text(&self, conn: ConnId, text: String) {
        self.send(SessionEvent::ModelFrame { conn, text }).await;
    }

    pub async fn detach_model(&self, conn: ConnId) {
        self.send(SessionEvent::ModelDetached { conn }).await;
    }

    pub async fn function_output(&self, conn: ConnId, call_id: String, output: String) {
        self.send(SessionEvent::FunctionOutput {
            conn,
            call_id,
            output,
        })
        .await;
    }

    /// Current state, as seen after every event queued before this call.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionEvent::Inspect(tx)).await;
        rx.await.ok()
    }
}

pub struct SessionManager {
    session: Session,
    connector: Arc<dyn ModelConnector>,
    dispatcher: Arc<dyn FunctionDispatcher>,
    /// Base of every `session.update` sent when a model link opens.
    defaults: Map<String, Value>,
    // Weak so the actor stops once every outside handle is dropped.
    self_tx: mpsc::WeakSender<SessionEvent>,
}

impl SessionManager {
    /// Starts the actor and returns its address.
    pub fn spawn(
        connector: Arc<dyn ModelConnector>,
        dispatcher: Arc<dyn FunctionDispatcher>,
        defaults: Map<String, Value>,
    ) -> SessionHandle {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let manager = Self {
            session: Session::default(),
            connector,
            dispatcher,
            defaults,
            self_tx: tx.downgrade(),
        };
        tokio::spawn(manager.run(rx).instrument(info_span!("session")));
        SessionHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SessionEvent>) {
        info!("Session actor started");
        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
        }
        self.close_all();
        info!("Session actor stopped");
    }

    fn handle(&self) -> Option<SessionHandle> {
        self.self_tx.upgrade().map(|tx| SessionHandle { tx })
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::TelephonyAttached { conn, credential } => {
                if self.session.telephony.is_some() {
                    info!("New call leg replaces the current one");
                    self.cleanup_call();
                }
                info!(conn = %conn.id(), "Call leg attached");
                self.session.telephony = Some(conn);
                self.session.api_credential = Some(credential);
            }
            SessionEvent::TelephonyFrame { conn, event } => {
                if self.is_telephony(conn) {
                    self.on_telephony_event(event).await;
                } else {
                    debug!(conn = %conn, "Ignoring frame from a replaced call leg");
                }
            }
            SessionEvent::TelephonyDetached { conn } => {
                if self.is_telephony(conn) {
                    info!(conn = %conn, "Call leg disconnected");
                    self.cleanup_call();
                }
            }
            SessionEvent::ObserverAttached { conn } => {
                if let Some(previous) = self.session.observer.take() {
                    info!(conn = %previous.id(), "New observer replaces the current one");
                    previous.close();
                }
                info!(conn = %conn.id(), "Observer attached");
                self.session.observer = Some(conn);
            }
            SessionEvent::ObserverFrame { conn, frame } => {
                if self.is_observer(conn) {
                    self.on_observer_frame(frame).await;
                } else {
                    debug!(conn = %conn, "Ignoring frame from a replaced observer");
                }
            }
            SessionEvent::ObserverDetached { conn } => {
                if self.is_observer(conn) {
                    info!(conn = %conn, "Observer disconnected");
                    self.session.observer = None;
                    self.reset_if_idle();
                }
            }
            SessionEvent::ModelConnected { conn, result } => {
                self.on_model_connected(conn, result).await;
            }
            SessionEvent::ModelFrame { conn, text } => {
                if self.session.model_id() == Some(conn) {
                    self.on_model_frame(conn, text).await;
                } else {
                    trace!(conn = %conn, "Ignoring frame from a stale model link");
                }
            }
            SessionEvent::ModelDetached { conn } => {
                if self.session.model_id() == Some(conn) {
                    info!(conn = %conn, "Model link ended");
                    self.close_model();
                    self.reset_if_idle();
                }
            }
            SessionEvent::FunctionOutput {
                conn,
                call_id,
                output,
            } => {
                self.on_function_output(conn, call_id, output).await;
            }
            SessionEvent::Inspect(reply) => {
                let _ = reply.send(self.session.snapshot());
            }
        }
    }

    fn is_telephony(&self, conn: ConnId) -> bool {
        self.session.telephony.as_ref().map(ConnHandle::id) == Some(conn)
    }

    fn is_observer(&self, conn: ConnId) -> bool {
        self.session.observer.as_ref().map(ConnHandle::id) == Some(conn)
    }

    async fn on_telephony_event(&mut self, event: TelephonyEvent) {
        match event {
            TelephonyEvent::Start {
                stream_sid: Some(stream_sid),
            } => {
                info!(stream_sid = %stream_sid, "Media stream started");
                self.session.begin_call(stream_sid);
                self.try_connect();
            }
            TelephonyEvent::Start { stream_sid: None } => {
                warn!("Ignoring start frame without a stream id");
            }
            TelephonyEvent::Media { timestamp, payload } => {
                self.session.latest_media_ts = timestamp;
                if self.session.live_model().is_some() {
                    self.send_to_model(&ModelCommand::InputAudioBufferAppend { audio: payload })
                        .await;
                }
            }
            TelephonyEvent::Close => {
                info!("Call leg asked to close the session");
                self.close_all();
            }
            TelephonyEvent::Connected | TelephonyEvent::Stop | TelephonyEvent::Mark { .. } => {
                debug!(?event, "Telephony event needs no action");
            }
            TelephonyEvent::Unhandled { kind } => {
                debug!(kind = %kind, "Unhandled telephony event");
            }
        }
    }

    async fn on_observer_frame(&mut self, frame: Value) {
        if self.session.live_model().is_some() {
            self.send_to_model(&frame).await;
        }
        if let Some(config) = session_update_payload(&frame) {
            info!(keys = config.len(), "Saved observer session config");
            self.session.saved_config = Some(config);
        }
    }

    /// Opens a model link unless one is live or already being opened, or the
    /// call is not ready for one.
    fn try_connect(&mut self) {
        let Some(credential) = self.session.api_credential.clone() else {
            debug!("No credential; not connecting to the model");
            return;
        };
        if self.session.telephony.is_none() || self.session.stream_sid.is_none() {
            debug!("Call not started; not connecting to the model");
            return;
        }
        match &self.session.model {
            ModelSlot::Connecting { .. } => return,
            ModelSlot::Live(conn) if conn.is_open() => return,
            _ => {}
        }
        let Some(handle) = self.handle() else {
            return;
        };
        self.close_model();

        let id = ConnId::next();
        self.session.model = ModelSlot::Connecting { id };
        info!(conn = %id, "Connecting to the model");

        let connector = self.connector.clone();
        tokio::spawn(
            async move {
                let result = connector.connect(id, credential, handle.clone()).await;
                handle.model_connected(id, result).await;
            }
            .instrument(info_span!("model_connect", conn = %id)),
        );
    }

    async fn on_model_connected(&mut self, conn: ConnId, result: anyhow::Result<ConnHandle>) {
        let pending = matches!(self.session.model, ModelSlot::Connecting { id } if id == conn);
        match result {
            Ok(handle) if pending => {
                info!(conn = %conn, "Model link is live");
                self.session.model = ModelSlot::Live(handle);
                self.send_initial_config().await;
            }
            Ok(handle) => {
                info!(conn = %conn, "Model link no longer wanted; closing it");
                handle.close();
            }
            Err(e) if pending => {
                error!(conn = %conn, error = ?e, "Failed to connect to the model");
                self.session.model = ModelSlot::Absent;
                self.reset_if_idle();
            }
            Err(e) => {
                debug!(conn = %conn, error = ?e, "Stale model connect attempt failed");
            }
        }
    }

    async fn send_initial_config(&mut self) {
        let mut session = self.defaults.clone();
        if let Some(saved) = &self.session.saved_config {
            for (key, value) in saved {
                session.insert(key.clone(), value.clone());
            }
        }
        self.send_to_model(&ModelCommand::SessionUpdate { session })
            .await;
    }

    async fn on_model_frame(&mut self, conn: ConnId, text: String) {
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable model frame");
                return;
            }
        };
        self.send_to_observer(text);

        let event = match ModelEvent::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping model frame");
                return;
            }
        };
        match event {
            ModelEvent::AudioDelta(delta) => {
                if let Some(frames) = relay::on_audio_delta(&mut self.session, delta) {
                    for frame in &frames {
                        self.send_to_telephony(frame).await;
                    }
                }
            }
            ModelEvent::SpeechStarted => {
                if let Some(barge_in) = relay::on_speech_started(&mut self.session) {
                    info!(truncate = ?barge_in.truncate, "Caller barged in");
                    self.send_to_model(&barge_in.truncate).await;
                    if let Some(clear) = barge_in.clear {
                        self.send_to_telephony(&clear).await;
                    }
                }
            }
            ModelEvent::OutputItemDone(OutputItem::FunctionCall(call)) => {
                if let Some(handle) = self.handle() {
                    function_call::spawn(self.dispatcher.clone(), conn, call, handle);
                }
            }
            ModelEvent::OutputItemDone(OutputItem::Other) => {}
            ModelEvent::Unhandled { kind } => trace!(kind = %kind, "Model event needs no action"),
        }
    }

    async fn on_function_output(&mut self, conn: ConnId, call_id: String, output: String) {
        let live = self.session.live_model().map(ConnHandle::id);
        if live != Some(conn) {
            warn!(call_id = %call_id, "Model link gone; dropping function result");
            return;
        }
        self.send_to_model(&ModelCommand::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput { call_id, output },
        })
        .await;
        self.send_to_model(&ModelCommand::ResponseCreate).await;
    }

    async fn send_to_model<T: Serialize + ?Sized>(&mut self, message: &T) {
        let Some(conn) = self.session.live_model().cloned() else {
            debug!("Model not connected; dropping message");
            return;
        };
        if let Err(e) = conn.send_json(message).await {
            warn!(error = %e, "Model send failed");
            self.close_model();
            self.reset_if_idle();
        }
    }

    async fn send_to_telephony(&mut self, command: &TelephonyCommand) {
        let Some(conn) = self.session.telephony.clone() else {
            return;
        };
        if let Err(e) = conn.send_json(command).await {
            warn!(error = %e, "Call leg send failed");
            self.cleanup_call();
        }
    }

    /// Mirrors a model frame without ever waiting on the observer. A full
    /// queue loses the frame; a dead observer is detached.
    fn send_to_observer(&mut self, text: String) {
        let Some(conn) = self.session.observer.clone() else {
            return;
        };
        match conn.try_send_text(text) {
            Ok(()) => {}
            Err(e @ SendError::Full { .. }) => warn!(error = %e, "Observer lagging"),
            Err(e) => {
                warn!(error = %e, "Observer send failed");
                conn.close();
                self.session.observer = None;
                self.reset_if_idle();
            }
        }
    }

    /// Drops the model link and the turn it was playing.
    fn close_model(&mut self) {
        if let ModelSlot::Live(conn) = std::mem::take(&mut self.session.model) {
            conn.close();
        }
        self.session.last_assistant_item = None;
        self.session.response_start_ts = None;
    }

    /// Ends the current call. The observer and its saved config survive.
    fn cleanup_call(&mut self) {
        self.close_model();
        if let Some(conn) = self.session.telephony.take() {
            conn.close();
        }
        self.session.clear_call();
        self.reset_if_idle();
    }

    fn close_all(&mut self) {
        self.close_model();
        for conn in [self.session.telephony.take(), self.session.observer.take()]
            .into_iter()
            .flatten()
        {
            conn.close();
        }
        self.session.reset();
    }

    fn reset_if_idle(&mut self) {
        if !self.session.has_connections() {
            info!("No connections left; session reset");
            self.session.reset();
        }
    }
}
