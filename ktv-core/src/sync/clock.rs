//! Clock and drift math
//!
//! Senders stamp every tick with the transport's network time and subtract
//! their own playout delay from the reported position. Receivers add the
//! network time elapsed since the stamp plus their own playout delay to get
//! where the sender's audio is right now.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds between the NTP epoch (1900) and the Unix epoch (1970)
pub const NTP_UNIX_OFFSET_MS: i64 = 2_208_988_800 * 1000;

/// Source of local wall-clock time in Unix milliseconds
pub trait WallClock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or_default()
    }
}

/// Convert a raw transport network time (NTP epoch) to Unix milliseconds.
/// A raw value of 0 means the transport has no network time yet, in which
/// case the local wall clock is used instead.
pub fn normalize_network_time(raw_ntp_ms: i64, clock: &dyn WallClock) -> i64 {
    if raw_ntp_ms == 0 {
        clock.now_ms()
    } else {
        raw_ntp_ms.saturating_sub(NTP_UNIX_OFFSET_MS)
    }
}

/// Position a sender puts on the wire, or `None` while the song has not yet
/// played past the sender's own playout delay
pub fn broadcast_position(local_position_ms: i64, playout_delay_ms: i64) -> Option<i64> {
    (local_position_ms > playout_delay_ms).then(|| local_position_ms - playout_delay_ms)
}

/// Result of comparing a co-singer's player against the latest tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftCorrection {
    /// Where the local player should be right now
    pub expected_position_ms: i64,
    /// Positive when the local player is behind
    pub drift_ms: i64,
    pub should_seek: bool,
}

/// Inputs of one drift evaluation
#[derive(Debug, Clone, Copy)]
pub struct DriftSample {
    pub sender_position_ms: i64,
    pub sender_network_time_ms: i64,
    pub local_network_time_ms: i64,
    pub local_playout_delay_ms: i64,
    pub local_position_ms: i64,
}

impl DriftSample {
    /// Evaluate drift; a seek is due only when `|drift|` exceeds the threshold.
    /// Sender values come off the wire, so the math saturates.
    #[must_use]
    pub fn evaluate(&self, threshold_ms: i64) -> DriftCorrection {
        let expected_position_ms = self
            .sender_position_ms
            .saturating_add(self.local_network_time_ms.saturating_sub(self.sender_network_time_ms))
            .saturating_add(self.local_playout_delay_ms);
        let drift_ms = expected_position_ms.saturating_sub(self.local_position_ms);

        DriftCorrection {
            expected_position_ms,
            drift_ms,
            should_seek: drift_ms.saturating_abs() > threshold_ms,
        }
    }
}
