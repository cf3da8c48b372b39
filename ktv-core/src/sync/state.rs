//! Position state derived from the local player and from received ticks

use crate::rtc::PlayerState;

use super::protocol::LrcTimeTick;

/// Local player position pinned to the wall-clock time it was observed.
/// While running it extrapolates, so callers get a smooth position between
/// the player's own (coarser) position callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionAnchor {
    pub position_ms: i64,
    pub observed_at_ms: i64,
    pub running: bool,
}

impl PositionAnchor {
    pub const fn running(position_ms: i64, observed_at_ms: i64) -> Self {
        Self {
            position_ms,
            observed_at_ms,
            running: true,
        }
    }

    pub const fn frozen(position_ms: i64, observed_at_ms: i64) -> Self {
        Self {
            position_ms,
            observed_at_ms,
            running: false,
        }
    }

    /// Position at `now_ms`
    pub fn position_at(&self, now_ms: i64) -> i64 {
        if self.running {
            self.position_ms
                .saturating_add(now_ms.saturating_sub(self.observed_at_ms).max(0))
        } else {
            self.position_ms
        }
    }
}

/// Latest tick received from the main singer
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteClockSample {
    pub position_ms: i64,
    pub network_time_ms: i64,
    /// Local wall-clock time the tick arrived
    pub received_at_ms: i64,
    pub duration_ms: i64,
    pub player_state: PlayerState,
    pub pitch: f64,
}

impl RemoteClockSample {
    pub fn from_tick(tick: &LrcTimeTick, received_at_ms: i64) -> Self {
        Self {
            position_ms: tick.position_ms,
            network_time_ms: tick.network_time_ms,
            received_at_ms,
            duration_ms: tick.duration_ms,
            player_state: tick.player_state,
            pitch: tick.pitch,
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.received_at_ms)
    }

    /// Check if the sample is too old to trust
    pub fn is_stale(&self, now_ms: i64, window_ms: i64) -> bool {
        self.age_ms(now_ms) > window_ms
    }

    /// Song position extrapolated from wall-clock time since receipt.
    /// Only advances while the sender reports playing, and never runs past
    /// the reported duration.
    pub fn virtual_position_ms(&self, now_ms: i64) -> i64 {
        if self.player_state != PlayerState::Playing {
            return self.position_ms;
        }
        let position = self.position_ms.saturating_add(self.age_ms(now_ms).max(0));
        if self.duration_ms > 0 {
            position.min(self.duration_ms)
        } else {
            position
        }
    }
}
