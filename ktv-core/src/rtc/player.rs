//! Local media player boundary

/// Media player state, numbered the way the player SDK reports it.
/// The numeric codes also travel over the side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlayerState {
    #[default]
    Idle,
    Opening,
    OpenCompleted,
    Playing,
    Paused,
    PlaybackCompleted,
    PlaybackAllLoopsCompleted,
    Stopped,
    Failed,
}

impl PlayerState {
    /// Wire code of this state
    pub const fn code(self) -> i64 {
        match self {
            PlayerState::Idle => 0,
            PlayerState::Opening => 1,
            PlayerState::OpenCompleted => 2,
            PlayerState::Playing => 3,
            PlayerState::Paused => 4,
            PlayerState::PlaybackCompleted => 5,
            PlayerState::PlaybackAllLoopsCompleted => 6,
            PlayerState::Stopped => 7,
            PlayerState::Failed => 100,
        }
    }

    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(PlayerState::Idle),
            1 => Some(PlayerState::Opening),
            2 => Some(PlayerState::OpenCompleted),
            3 => Some(PlayerState::Playing),
            4 => Some(PlayerState::Paused),
            5 => Some(PlayerState::PlaybackCompleted),
            6 => Some(PlayerState::PlaybackAllLoopsCompleted),
            7 => Some(PlayerState::Stopped),
            100 => Some(PlayerState::Failed),
            _ => None,
        }
    }
}

/// The local player that renders the song's accompaniment.
///
/// Calls are fire-and-forget; state changes come back through
/// [`crate::KtvEngine::on_player_state_changed`] and position updates through
/// [`crate::KtvEngine::on_player_position_changed`].
pub trait MediaPlayer: Send + Sync {
    fn open(&self, song_code: &str, start_position_ms: i64);
    fn play(&self);
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    fn seek(&self, position_ms: i64);
    fn position_ms(&self) -> i64;
    fn duration_ms(&self) -> i64;
    fn state(&self) -> PlayerState;
}
