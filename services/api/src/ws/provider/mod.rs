//! Connections to the realtime speech model.

pub mod openai;

use super::{
    connection::{ConnHandle, ConnId},
    manager::SessionHandle,
};
use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Map, Value, json};
use std::{sync::Arc, time::Duration};

/// Opens the socket to the model.
///
/// A connector owns the socket's read and write loops. It reports inbound
/// text through [`SessionHandle::model_text`] and calls
/// [`SessionHandle::detach_model`] exactly once when the link ends.
#[async_trait]
pub trait ModelConnector: Send + Sync {
    async fn connect(
        &self,
        id: ConnId,
        credential: Arc<SecretString>,
        session: SessionHandle,
    ) -> anyhow::Result<ConnHandle>;
}

/// Keepalive and sizing limits for the model socket.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    pub ping_interval: Duration,
    /// How long to wait for a pong before giving up on the link.
    pub pong_timeout: Duration,
    pub close_timeout: Duration,
    pub max_message_size: usize,
    pub queue_depth: usize,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(10),
            max_message_size: 10 * 1024 * 1024,
            queue_depth: 32,
        }
    }
}

/// The `session.update` payload sent when a model link opens, before any
/// observer overrides are merged in.
pub fn default_session_config(voice: &str) -> Map<String, Value> {
    let config = json!({
        "modalities": ["text", "audio"],
        "turn_detection": { "type": "server_vad" },
        "voice": voice,
        "input_audio_transcription": { "model": "whisper-1" },
        "input_audio_format": "g711_ulaw",
        "output_audio_format": "g711_ulaw",
    });
    match config {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
