//! The state of the one call this process relays.
//!
//! `Session` is plain data. It is owned by the session actor in
//! [`super::manager`] and never shared, so nothing here locks.

use super::connection::{ConnHandle, ConnId};
use secrecy::SecretString;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use utoipa::ToSchema;

/// The model socket slot.
///
/// `Connecting` holds the id reserved for a handshake still in flight, so a
/// second `start` cannot open a second socket.
#[derive(Debug, Default)]
pub enum ModelSlot {
    #[default]
    Absent,
    Connecting {
        id: ConnId,
    },
    Live(ConnHandle),
}

#[derive(Debug, Default)]
pub struct Session {
    pub telephony: Option<ConnHandle>,
    pub observer: Option<ConnHandle>,
    pub model: ModelSlot,
    pub stream_sid: Option<String>,
    /// Overrides captured from the observer's `session.update` frames.
    pub saved_config: Option<Map<String, Value>>,
    pub last_assistant_item: Option<String>,
    /// Media clock value at which the in-flight response started playing.
    pub response_start_ts: Option<i64>,
    pub latest_media_ts: i64,
    pub api_credential: Option<Arc<SecretString>>,
}

impl Session {
    /// The model handle, if it is connected and still open.
    pub fn live_model(&self) -> Option<&ConnHandle> {
        match &self.model {
            ModelSlot::Live(conn) if conn.is_open() => Some(conn),
            _ => None,
        }
    }

    /// Id of the model link occupying the slot, whether live or still connecting.
    pub fn model_id(&self) -> Option<ConnId> {
        match &self.model {
            ModelSlot::Absent => None,
            ModelSlot::Connecting { id } => Some(*id),
            ModelSlot::Live(conn) => Some(conn.id()),
        }
    }

    pub fn has_connections(&self) -> bool {
        self.telephony.is_some() || self.observer.is_some() || self.model_id().is_some()
    }

    /// Starts a new media stream: timing state from any earlier stream is dropped.
    pub fn begin_call(&mut self, stream_sid: String) {
        self.stream_sid = Some(stream_sid);
        self.latest_media_ts = 0;
        self.last_assistant_item = None;
        self.response_start_ts = None;
    }

    /// Clears the call-scoped fields. Connection slots, the saved observer
    /// configuration and the credential are left alone.
    pub fn clear_call(&mut self) {
        self.stream_sid = None;
        self.latest_media_ts = 0;
        self.last_assistant_item = None;
        self.response_start_ts = None;
    }

    /// Back to the state of a freshly started process.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let model = match &self.model {
            ModelSlot::Absent => ModelState::Absent,
            ModelSlot::Connecting { .. } => ModelState::Connecting,
            ModelSlot::Live(conn) if conn.is_open() => ModelState::Live,
            ModelSlot::Live(_) => ModelState::Closed,
        };
        SessionSnapshot {
            telephony_attached: self.telephony.is_some(),
            observer_attached: self.observer.is_some(),
            model,
            stream_sid: self.stream_sid.clone(),
            last_assistant_item: self.last_assistant_item.clone(),
            response_start_ts: self.response_start_ts,
            latest_media_ts: self.latest_media_ts,
            saved_config: self.saved_config.clone(),
            credential_set: self.api_credential.is_some(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Absent,
    Connecting,
    Live,
    /// The slot still holds a handle whose socket has gone away.
    Closed,
}

/// Read-only view of the session, served by `GET /session`.
#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub telephony_attached: bool,
    pub observer_attached: bool,
    pub model: ModelState,
    pub stream_sid: Option<String>,
    pub last_assistant_item: Option<String>,
    pub response_start_ts: Option<i64>,
    pub latest_media_ts: i64,
    #[schema(value_type = Option<Object>)]
    pub saved_config: Option<Map<String, Value>>,
    pub credential_set: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connection::ConnKind;
    use serde_json::json;

    #[test]
    fn test_empty_session() {
        let session = Session::default();
        assert!(!session.has_connections());
        assert!(session.live_model().is_none());

        let snapshot = session.snapshot();
        assert_eq!(snapshot.model, ModelState::Absent);
        assert_eq!(snapshot.latest_media_ts, 0);
        assert!(!snapshot.credential_set);
    }

    #[test]
    fn test_connecting_slot_counts_as_connection() {
        let mut session = Session::default();
        let id = ConnId::next();
        session.model = ModelSlot::Connecting { id };

        assert!(session.has_connections());
        assert!(session.live_model().is_none());
        assert_eq!(session.model_id(), Some(id));
        assert_eq!(session.snapshot().model, ModelState::Connecting);
    }

    #[test]
    fn test_closed_model_is_not_live() {
        let mut session = Session::default();
        let (conn, rx) = ConnHandle::channel(ConnKind::Model, 4);
        session.model = ModelSlot::Live(conn);
        assert!(session.live_model().is_some());

        drop(rx);
        assert!(session.live_model().is_none());
        assert_eq!(session.snapshot().model, ModelState::Closed);
        assert!(session.has_connections());
    }

    #[test]
    fn test_begin_and_clear_call() {
        let mut session = Session::default();
        session.last_assistant_item = Some("I0".to_string());
        session.response_start_ts = Some(40);
        session.latest_media_ts = 900;
        session.saved_config = Some(json!({"voice": "verse"}).as_object().cloned().unwrap());

        session.begin_call("S1".to_string());
        assert_eq!(session.stream_sid.as_deref(), Some("S1"));
        assert_eq!(session.latest_media_ts, 0);
        assert!(session.last_assistant_item.is_none());
        assert!(session.response_start_ts.is_none());

        session.latest_media_ts = 120;
        session.clear_call();
        assert!(session.stream_sid.is_none());
        assert_eq!(session.latest_media_ts, 0);
        assert!(session.saved_config.is_some());
    }

    #[test]
    fn test_reset_drops_everything() {
        let mut session = Session::default();
        let (conn, _rx) = ConnHandle::channel(ConnKind::Observer, 4);
        session.observer = Some(conn);
        session.saved_config = Some(Map::new());
        session.api_credential = Some(Arc::new(SecretString::from("sk-test".to_string())));

        session.reset();
        assert!(!session.has_connections());
        assert!(session.saved_config.is_none());
        assert!(session.api_credential.is_none());
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut session = Session::default();
        session.begin_call("S1".to_string());
        session.response_start_ts = Some(1000);

        let value = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(value["model"], "absent");
        assert_eq!(value["stream_sid"], "S1");
        assert_eq!(value["response_start_ts"], 1000);
        assert_eq!(value["saved_config"], Value::Null);
    }
}
