//! Wire formats for the three sockets the relay speaks on: the telephony
//! media stream, the realtime model, and the observer.
//!
//! Inbound frames decode into closed enums. Tags the relay has no transition
//! for land in an `Unhandled` variant carrying the tag, so callers can log
//! them instead of losing them silently.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Why an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no `{0}` tag")]
    MissingTag(&'static str),
}

/// Reads a string field where an explicit `null` means empty.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn tag(value: &Value, field: &'static str) -> Result<String, CodecError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(CodecError::MissingTag(field))
}

// --- Telephony media stream ---

/// Frames received from the call leg.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyEvent {
    Connected,
    Start { stream_sid: Option<String> },
    /// `timestamp` is the media clock in milliseconds; unparsable values read as 0.
    Media { timestamp: i64, payload: String },
    Mark { name: Option<String> },
    Stop,
    Close,
    Unhandled { kind: String },
}

#[derive(Deserialize, Default)]
struct StartBody {
    #[serde(rename = "streamSid", alias = "streamId", default)]
    stream_sid: Option<String>,
}

#[derive(Deserialize)]
struct StartFrame {
    #[serde(default)]
    start: Option<StartBody>,
}

#[derive(Deserialize, Default)]
struct MediaBody {
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    payload: String,
}

#[derive(Deserialize)]
struct MediaFrame {
    #[serde(default)]
    media: Option<MediaBody>,
}

#[derive(Deserialize, Default)]
struct MarkBody {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct MarkFrame {
    #[serde(default)]
    mark: Option<MarkBody>,
}

impl TelephonyEvent {
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = tag(&value, "event")?;
        Ok(match kind.as_str() {
            "connected" => Self::Connected,
            "start" => {
                let frame: StartFrame = serde_json::from_value(value)?;
                Self::Start {
                    stream_sid: frame.start.unwrap_or_default().stream_sid,
                }
            }
            "media" => {
                let media = serde_json::from_value::<MediaFrame>(value)?
                    .media
                    .unwrap_or_default();
                Self::Media {
                    timestamp: media_clock(media.timestamp.as_ref()),
                    payload: media.payload,
                }
            }
            "mark" => {
                let frame: MarkFrame = serde_json::from_value(value)?;
                Self::Mark {
                    name: frame.mark.unwrap_or_default().name,
                }
            }
            "stop" => Self::Stop,
            "close" => Self::Close,
            _ => Self::Unhandled { kind },
        })
    }
}

/// Reads a media-clock timestamp that may arrive as a JSON string or number.
fn media_clock(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Frames sent to the call leg.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyCommand {
    /// Audio for the caller to hear.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// Playback marker; the call leg echoes it back once preceding audio has played.
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    /// Drop any audio queued but not yet played.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub payload: String,
}

// --- Realtime model ---

/// Events received from the realtime model that the relay acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    AudioDelta(AudioDelta),
    /// The model's voice-activity detector heard the caller start talking.
    SpeechStarted,
    OutputItemDone(OutputItem),
    Unhandled { kind: String },
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AudioDelta {
    /// Base64 audio, already in the call leg's codec.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub delta: String,
    #[serde(default)]
    pub item_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    FunctionCall(FunctionCall),
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    /// JSON-encoded argument object, passed to the dispatcher untouched.
    #[serde(default = "empty_arguments")]
    pub arguments: String,
    #[serde(default)]
    pub call_id: String,
}

fn empty_arguments() -> String {
    "{}".to_string()
}

#[derive(Deserialize)]
struct OutputItemDoneFrame {
    item: OutputItem,
}

impl ModelEvent {
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let kind = tag(&value, "type")?;
        Ok(match kind.as_str() {
            "response.audio.delta" => Self::AudioDelta(serde_json::from_value(value)?),
            "input_audio_buffer.speech_started" => Self::SpeechStarted,
            "response.output_item.done" => {
                let frame: OutputItemDoneFrame = serde_json::from_value(value)?;
                Self::OutputItemDone(frame.item)
            }
            _ => Self::Unhandled { kind },
        })
    }
}

/// Messages sent to the realtime model.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ModelCommand {
    #[serde(rename = "session.update")]
    SessionUpdate { session: Map<String, Value> },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: i64,
    },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    FunctionCallOutput { call_id: String, output: String },
}

// --- Observer ---

/// Observer frames are free-form JSON; the only requirement is that they parse.
pub fn decode_observer_frame(text: &str) -> Result<Value, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Extracts the configuration carried by a `session.update` frame.
///
/// Returns `None` for any other frame type. A `session.update` without a
/// `session` member yields an empty map.
pub fn session_update_payload(frame: &Value) -> Option<Map<String, Value>> {
    if frame.get("type").and_then(Value::as_str) != Some("session.update") {
        return None;
    }
    match frame.get("session") {
        None | Some(Value::Null) => Some(Map::new()),
        Some(Value::Object(map)) => Some(map.clone()),
        Some(other) => {
            warn!(payload = %other, "Ignoring session.update whose session is not an object");
            None
        }
    }
}
