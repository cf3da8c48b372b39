//! Real-time transport boundary

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::role::Role;

/// Errors reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Joining channel failed with code {0}")]
    JoinFailed(i32),

    #[error("Timed out waiting for the channel join")]
    JoinTimeout,

    #[error("Not in a secondary channel")]
    NotJoined,

    #[error("Transport call failed with code {0}")]
    Call(i32),

    #[error("Transport request was dropped before completing")]
    Dropped,
}

impl TransportError {
    /// Map a transport return code to a result
    pub fn check(code: i32) -> Result<(), TransportError> {
        if code == 0 {
            Ok(())
        } else {
            Err(TransportError::Call(code))
        }
    }
}

/// Audio routing profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioScenario {
    #[default]
    GameStreaming,
    Chorus,
}

/// Which audio track of the song the player renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackMode {
    #[default]
    Original,
    Accompaniment,
}

impl TrackMode {
    pub const fn track_index(self) -> i32 {
        match self {
            TrackMode::Original => 0,
            TrackMode::Accompaniment => 1,
        }
    }
}

/// Media options for a channel connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelOptions {
    pub publish_microphone: bool,
    pub publish_media_player_audio: bool,
    pub publish_direct_custom_audio: bool,
    pub auto_subscribe_audio: bool,
    pub enable_audio_recording_or_playout: bool,
}

impl ChannelOptions {
    /// Main channel for a solo or lead singer: publish the player track
    pub const fn main_publishing() -> Self {
        Self {
            publish_microphone: true,
            publish_media_player_audio: true,
            publish_direct_custom_audio: false,
            auto_subscribe_audio: true,
            enable_audio_recording_or_playout: true,
        }
    }

    /// Main channel for everyone else: subscribe, never publish the player
    pub const fn main_subscribe_only() -> Self {
        Self {
            publish_microphone: true,
            publish_media_player_audio: false,
            publish_direct_custom_audio: false,
            auto_subscribe_audio: true,
            enable_audio_recording_or_playout: true,
        }
    }

    /// Chorus channel options. The lead pushes its voice as a direct track
    /// and does not listen; co-singers listen and publish nothing.
    pub fn chorus(role: Role) -> Self {
        let lead = role == Role::LeadSinger;
        Self {
            publish_microphone: false,
            publish_media_player_audio: false,
            publish_direct_custom_audio: lead,
            auto_subscribe_audio: !lead,
            enable_audio_recording_or_playout: !lead,
        }
    }
}

/// A captured microphone frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub samples_per_channel: u32,
    pub channels: u32,
    pub sample_rate: u32,
}

/// The real-time audio transport.
///
/// Only the two secondary-channel calls are asynchronous; everything else
/// completes immediately and reports a status.
#[async_trait]
pub trait RtcTransport: Send + Sync {
    /// Join the chorus channel as a broadcaster with the local uid.
    /// Resolves once the transport confirms or rejects the join.
    async fn join_secondary_channel(
        &self,
        channel_id: &str,
        token: &str,
        options: &ChannelOptions,
    ) -> Result<(), TransportError>;

    async fn leave_secondary_channel(&self) -> Result<(), TransportError>;

    fn update_channel_options(&self, options: &ChannelOptions) -> Result<(), TransportError>;

    fn update_secondary_channel_options(&self, options: &ChannelOptions) -> Result<(), TransportError>;

    fn send_side_channel_message(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Raw network time (NTP epoch, ms); 0 when unavailable
    fn current_network_time_ms(&self) -> i64;

    fn set_recorded_audio_frame_parameters(
        &self,
        sample_rate: u32,
        channels: u32,
        samples_per_call: u32,
    ) -> Result<(), TransportError>;

    fn set_direct_external_audio_source(&self, enabled: bool) -> Result<(), TransportError>;

    fn push_direct_audio_frame(&self, frame: &AudioFrame) -> Result<(), TransportError>;

    fn mute_remote_audio(&self, uid: u32, muted: bool) -> Result<(), TransportError>;

    fn set_audio_scenario(&self, scenario: AudioScenario) -> Result<(), TransportError>;

    fn adjust_playback_signal_volume(&self, volume: i32) -> Result<(), TransportError>;

    fn select_audio_track(&self, index: i32) -> Result<(), TransportError>;
}

/// Log a failed configuration call; these never abort a transition
pub(crate) fn log_failure(operation: &str, result: Result<(), TransportError>) {
    if let Err(e) = result {
        warn!("Transport {} failed: {}", operation, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chorus_options_by_role() {
        let lead = ChannelOptions::chorus(Role::LeadSinger);
        assert!(lead.publish_direct_custom_audio);
        assert!(!lead.auto_subscribe_audio);
        assert!(!lead.enable_audio_recording_or_playout);
        assert!(!lead.publish_microphone);

        let co = ChannelOptions::chorus(Role::CoSinger);
        assert!(!co.publish_direct_custom_audio);
        assert!(co.auto_subscribe_audio);
        assert!(co.enable_audio_recording_or_playout);
    }

    #[test]
    fn test_check_code() {
        assert_eq!(TransportError::check(0), Ok(()));
        assert_eq!(TransportError::check(-17), Err(TransportError::Call(-17)));
    }
}
