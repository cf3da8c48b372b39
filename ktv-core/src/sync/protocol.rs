//! Sync Protocol Messages
//!
//! Messages travel as a flat JSON object over the transport's unreliable
//! stream channel. Numbers may arrive as JSON numbers or numeric strings,
//! missing fields read as zero and unknown commands are ignored.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rtc::PlayerState;

/// Command name of the high-frequency position tick
pub const CMD_SET_LRC_TIME: &str = "setLrcTime";

/// Command name of the player state change
pub const CMD_PLAYER_STATE: &str = "PlayerState";

/// Errors decoding or encoding a side-channel payload
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed sync payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Field `{0}` is not a usable number")]
    NotNumeric(&'static str),
}

/// Position/pitch tick broadcast by the main singer
#[derive(Debug, Clone, PartialEq)]
pub struct LrcTimeTick {
    /// Sender position with its own playout delay already subtracted
    pub position_ms: i64,
    pub duration_ms: i64,
    /// Sender network time, Unix epoch
    pub network_time_ms: i64,
    pub pitch: f64,
    pub player_state: PlayerState,
}

/// Messages exchanged between singers and listeners
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Periodic position tick
    LrcTime(LrcTimeTick),

    /// The main singer's player changed state
    PlayerState { state: PlayerState, user_id: u32 },
}

impl SyncMessage {
    /// Encode as a side-channel payload
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let wire = match self {
            SyncMessage::LrcTime(tick) => WireMessage {
                cmd: Some(CMD_SET_LRC_TIME.to_string()),
                time: Some(WireValue::Int(tick.position_ms)),
                duration: Some(WireValue::Int(tick.duration_ms)),
                ntp: Some(WireValue::Int(tick.network_time_ms)),
                pitch: Some(WireValue::Float(tick.pitch)),
                state: Some(WireValue::Int(tick.player_state.code())),
                ..WireMessage::default()
            },
            SyncMessage::PlayerState { state, user_id } => WireMessage {
                cmd: Some(CMD_PLAYER_STATE.to_string()),
                state: Some(WireValue::Int(state.code())),
                user_id: Some(WireValue::Int(i64::from(*user_id))),
                ..WireMessage::default()
            },
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Decode a side-channel payload.
    ///
    /// Returns `Ok(None)` for payloads carrying a command this engine does
    /// not handle.
    pub fn decode(payload: &[u8]) -> Result<Option<SyncMessage>, CodecError> {
        let wire: WireMessage = serde_json::from_slice(payload)?;

        match wire.cmd.as_deref() {
            Some(CMD_SET_LRC_TIME) => {
                let code = int_field(wire.state.as_ref().or(wire.player_state.as_ref()), "state")?;
                Ok(Some(SyncMessage::LrcTime(LrcTimeTick {
                    position_ms: int_field(wire.time.as_ref(), "time")?,
                    duration_ms: int_field(wire.duration.as_ref(), "duration")?,
                    network_time_ms: int_field(wire.ntp.as_ref(), "ntp")?,
                    pitch: float_field(wire.pitch.as_ref(), "pitch")?,
                    player_state: PlayerState::from_code(code).unwrap_or(PlayerState::Stopped),
                })))
            }
            Some(CMD_PLAYER_STATE) => {
                let code = int_field(wire.state.as_ref().or(wire.player_state.as_ref()), "state")?;
                let user_id = int_field(wire.user_id.as_ref(), "userId")?;
                Ok(Some(SyncMessage::PlayerState {
                    state: PlayerState::from_code(code).unwrap_or(PlayerState::Idle),
                    user_id: u32::try_from(user_id).map_err(|_| CodecError::NotNumeric("userId"))?,
                }))
            }
            _ => Ok(None),
        }
    }
}

/// Flat key/value form on the wire
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<WireValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<WireValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ntp: Option<WireValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pitch: Option<WireValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<WireValue>,
    /// Older senders put the tick's state under this key
    #[serde(default, rename = "playerState", skip_serializing_if = "Option::is_none")]
    player_state: Option<WireValue>,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    user_id: Option<WireValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl WireValue {
    fn as_i64(&self) -> Option<i64> {
        match self {
            WireValue::Int(v) => Some(*v),
            WireValue::Float(v) => v.is_finite().then(|| v.round() as i64),
            WireValue::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.round() as i64))
            }
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Int(v) => Some(*v as f64),
            WireValue::Float(v) => Some(*v),
            WireValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
        .filter(|v| v.is_finite())
    }
}

fn int_field(value: Option<&WireValue>, name: &'static str) -> Result<i64, CodecError> {
    value.map_or(Ok(0), |v| v.as_i64().ok_or(CodecError::NotNumeric(name)))
}

fn float_field(value: Option<&WireValue>, name: &'static str) -> Result<f64, CodecError> {
    value.map_or(Ok(0.0), |v| v.as_f64().ok_or(CodecError::NotNumeric(name)))
}
