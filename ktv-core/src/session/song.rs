//! Per-song state

use crate::loader::LoadError;
use crate::role::Role;

/// Arguments of a load request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongRequest {
    pub song_code: String,
    /// Start playback as soon as the load finishes (solo singers only)
    pub auto_play: bool,
    pub main_singer_uid: u32,
    /// Role the song is being loaded for
    pub role: Role,
}

/// Load progress. Only moves forward within one load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    InProgress,
    Ready,
    Failed(LoadError),
}

impl LoadState {
    fn rank(self) -> u8 {
        match self {
            LoadState::Idle => 0,
            LoadState::InProgress => 1,
            LoadState::Ready | LoadState::Failed(_) => 2,
        }
    }

    /// Move to `next` if it is ahead of the current state. Returns whether
    /// the state changed.
    pub fn advance(&mut self, next: LoadState) -> bool {
        if next.rank() > self.rank() {
            *self = next;
            true
        } else {
            false
        }
    }

    pub fn is_ready(self) -> bool {
        self == LoadState::Ready
    }
}

/// The song currently loaded into the engine
#[derive(Debug, Clone, PartialEq)]
pub struct SongSession {
    /// Identifies the load attempt; results of older attempts are dropped
    pub attempt_id: u64,
    pub song_code: String,
    /// Role the song was loaded for
    pub role: Role,
    pub auto_play: bool,
    pub main_singer_uid: u32,
    pub lyric_url: Option<String>,
    pub load_state: LoadState,
}

impl SongSession {
    pub fn new(attempt_id: u64, request: &SongRequest) -> Self {
        Self {
            attempt_id,
            song_code: request.song_code.clone(),
            role: request.role,
            auto_play: request.auto_play,
            main_singer_uid: request.main_singer_uid,
            lyric_url: None,
            load_state: LoadState::InProgress,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.load_state.is_ready()
    }
}

/// Running score of the current song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScoreBook {
    pub line_count: i32,
    pub cumulative: i32,
}

impl ScoreBook {
    pub fn average(&self) -> i32 {
        if self.line_count <= 0 {
            0
        } else {
            self.cumulative / self.line_count
        }
    }
}

/// Lyric boundaries and whether their events already fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LyricBoundaries {
    pub prelude_end_ms: Option<i64>,
    pub song_end_ms: Option<i64>,
    pub prelude_fired: bool,
    pub end_fired: bool,
}

impl LyricBoundaries {
    pub fn new(prelude_end_ms: i64, song_end_ms: i64) -> Self {
        Self {
            prelude_end_ms: Some(prelude_end_ms),
            song_end_ms: Some(song_end_ms),
            ..Self::default()
        }
    }

    pub fn rearm(&mut self) {
        self.prelude_fired = false;
        self.end_fired = false;
    }

    /// Check `position_ms` against both boundaries, marking each as fired
    /// the first time it is crossed. Returns (prelude_end, song_end).
    pub fn check(&mut self, position_ms: i64, prelude_lead_ms: i64) -> (bool, bool) {
        let prelude = match self.prelude_end_ms {
            Some(end) if !self.prelude_fired && position_ms.saturating_add(prelude_lead_ms) >= end => {
                self.prelude_fired = true;
                true
            }
            _ => false,
        };
        let song_end = match self.song_end_ms {
            Some(end) if !self.end_fired && position_ms >= end => {
                self.end_fired = true;
                true
            }
            _ => false,
        };
        (prelude, song_end)
    }
}
