//! Events published by the engine

use crate::loader::LoadError;
use crate::role::Role;
use crate::rtc::PlayerState;

/// Engine event, delivered to every subscriber in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum KtvEvent {
    LoadSuccess {
        song_code: String,
        lyric_url: String,
    },
    LoadFailure {
        song_code: String,
        reason: LoadError,
    },
    /// `is_local` is false when the state came from the main singer
    PlayerStateChanged {
        state: PlayerState,
        is_local: bool,
    },
    RoleChanged {
        old: Role,
        new: Role,
    },
    PreludeEndReached,
    SongEndReached,
    ScoreUpdated {
        line_score: i32,
        cumulative_score: i32,
    },
    /// Lyric position for the UI, emitted on every tick that has one
    PositionUpdated {
        position_ms: i64,
        pitch: f64,
    },
}
