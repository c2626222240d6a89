//! Audio relay and barge-in.
//!
//! These functions only update the session and return the frames to send.
//! The actor in [`super::manager`] does the sending.

use super::{
    protocol::{AudioDelta, MediaPayload, ModelCommand, TelephonyCommand},
    session::Session,
};
use tracing::debug;

/// What to send when the caller talks over the model.
#[derive(Debug, Clone, PartialEq)]
pub struct BargeIn {
    pub truncate: ModelCommand,
    /// `None` when the call leg is gone or never reported a stream id.
    pub clear: Option<TelephonyCommand>,
}

/// Handles one chunk of model audio.
///
/// The first delta of a turn anchors `response_start_ts` to the caller's
/// media clock. Returns the media frame and its playback mark, or `None`
/// when there is nothing to send.
pub fn on_audio_delta(session: &mut Session, delta: AudioDelta) -> Option<[TelephonyCommand; 2]> {
    if session.telephony.is_none() {
        return None;
    }
    let stream_sid = session.stream_sid.clone()?;

    if session.response_start_ts.is_none() {
        session.response_start_ts = Some(session.latest_media_ts);
        debug!(start = session.latest_media_ts, "Model response started");
    }
    if let Some(item_id) = delta.item_id.filter(|id| !id.is_empty()) {
        session.last_assistant_item = Some(item_id);
    }
    if delta.delta.is_empty() {
        return None;
    }

    Some([
        TelephonyCommand::Media {
            stream_sid: stream_sid.clone(),
            media: MediaPayload {
                payload: delta.delta,
            },
        },
        TelephonyCommand::Mark { stream_sid },
    ])
}

/// Handles the model hearing the caller start to speak.
///
/// Nothing happens unless a response is in flight. Otherwise the turn is
/// closed and the frames that truncate it on both sides are returned.
pub fn on_speech_started(session: &mut Session) -> Option<BargeIn> {
    let (Some(item_id), Some(start)) = (
        session.last_assistant_item.clone(),
        session.response_start_ts,
    ) else {
        debug!("Speech started with no response in flight");
        return None;
    };

    let audio_end_ms = audio_end_ms(session.latest_media_ts, start);
    let clear = match (&session.telephony, &session.stream_sid) {
        (Some(_), Some(sid)) => Some(TelephonyCommand::Clear {
            stream_sid: sid.clone(),
        }),
        _ => None,
    };

    session.last_assistant_item = None;
    session.response_start_ts = None;

    Some(BargeIn {
        truncate: ModelCommand::ConversationItemTruncate {
            item_id,
            content_index: 0,
            audio_end_ms,
        },
        clear,
    })
}

/// How much of the response the caller heard, clamped at zero when the media
/// clock runs behind the anchor.
pub fn audio_end_ms(latest_media_ts: i64, response_start_ts: i64) -> i64 {
    latest_media_ts.saturating_sub(response_start_ts).max(0)
}
