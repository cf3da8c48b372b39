//! FFI types exposed via uniffi

use crate::config::{ConfigError, KtvConfig};
use crate::loader::LoadError;
use crate::role::{Role, SwitchRoleError};
use crate::rtc::{AudioFrame, AudioScenario, ChannelOptions, PlayerState, TrackMode};
use crate::session::PlaybackError;

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        CoreError::InvalidConfig(e.to_string())
    }
}

impl From<PlaybackError> for CoreError {
    fn from(e: PlaybackError) -> Self {
        CoreError::Playback(e.to_string())
    }
}

/// Singing role exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SingRole {
    Audience,
    SoloSinger,
    CoSinger,
    LeadSinger,
}

impl From<Role> for SingRole {
    fn from(r: Role) -> Self {
        match r {
            Role::Audience => SingRole::Audience,
            Role::SoloSinger => SingRole::SoloSinger,
            Role::CoSinger => SingRole::CoSinger,
            Role::LeadSinger => SingRole::LeadSinger,
        }
    }
}

impl From<SingRole> for Role {
    fn from(r: SingRole) -> Self {
        match r {
            SingRole::Audience => Role::Audience,
            SingRole::SoloSinger => Role::SoloSinger,
            SingRole::CoSinger => Role::CoSinger,
            SingRole::LeadSinger => Role::LeadSinger,
        }
    }
}

/// Media player state exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum MediaPlayerState {
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

impl From<PlayerState> for MediaPlayerState {
    fn from(s: PlayerState) -> Self {
        match s {
            PlayerState::Idle => MediaPlayerState::Idle,
            PlayerState::Opening => MediaPlayerState::Opening,
            PlayerState::OpenCompleted => MediaPlayerState::OpenCompleted,
            PlayerState::Playing => MediaPlayerState::Playing,
            PlayerState::Paused => MediaPlayerState::Paused,
            PlayerState::PlaybackCompleted => MediaPlayerState::PlaybackCompleted,
            PlayerState::PlaybackAllLoopsCompleted => MediaPlayerState::PlaybackAllLoopsCompleted,
            PlayerState::Stopped => MediaPlayerState::Stopped,
            PlayerState::Failed => MediaPlayerState::Failed,
        }
    }
}

impl From<MediaPlayerState> for PlayerState {
    fn from(s: MediaPlayerState) -> Self {
        match s {
            MediaPlayerState::Idle => PlayerState::Idle,
            MediaPlayerState::Opening => PlayerState::Opening,
            MediaPlayerState::OpenCompleted => PlayerState::OpenCompleted,
            MediaPlayerState::Playing => PlayerState::Playing,
            MediaPlayerState::Paused => PlayerState::Paused,
            MediaPlayerState::PlaybackCompleted => PlayerState::PlaybackCompleted,
            MediaPlayerState::PlaybackAllLoopsCompleted => PlayerState::PlaybackAllLoopsCompleted,
            MediaPlayerState::Stopped => PlayerState::Stopped,
            MediaPlayerState::Failed => PlayerState::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum LoadFailReason {
    NoLyricUrl,
    AssetPreloadFailed,
    Cancelled,
}

impl From<LoadError> for LoadFailReason {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::NoLyricUrl => LoadFailReason::NoLyricUrl,
            LoadError::AssetPreloadFailed => LoadFailReason::AssetPreloadFailed,
            LoadError::Cancelled => LoadFailReason::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SwitchRoleFailReason {
    NoPermission,
    JoinChannelFailed,
    AssetPreloadFailed,
    PreloadAndJoinFailed,
    TransitionInProgress,
}

impl From<SwitchRoleError> for SwitchRoleFailReason {
    fn from(e: SwitchRoleError) -> Self {
        match e {
            SwitchRoleError::NoPermission { .. } => SwitchRoleFailReason::NoPermission,
            SwitchRoleError::JoinChannelFailed => SwitchRoleFailReason::JoinChannelFailed,
            SwitchRoleError::AssetPreloadFailed => SwitchRoleFailReason::AssetPreloadFailed,
            SwitchRoleError::PreloadAndJoinFailed => SwitchRoleFailReason::PreloadAndJoinFailed,
            SwitchRoleError::TransitionInProgress => SwitchRoleFailReason::TransitionInProgress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum AudioScenarioKind {
    GameStreaming,
    Chorus,
}

impl From<AudioScenario> for AudioScenarioKind {
    fn from(s: AudioScenario) -> Self {
        match s {
            AudioScenario::GameStreaming => AudioScenarioKind::GameStreaming,
            AudioScenario::Chorus => AudioScenarioKind::Chorus,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum TrackModeKind {
    Original,
    Accompaniment,
}

impl From<TrackModeKind> for TrackMode {
    fn from(m: TrackModeKind) -> Self {
        match m {
            TrackModeKind::Original => TrackMode::Original,
            TrackModeKind::Accompaniment => TrackMode::Accompaniment,
        }
    }
}

/// Channel media options exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Record)]
pub struct ChannelMediaOptions {
    pub publish_microphone: bool,
    pub publish_media_player_audio: bool,
    pub publish_direct_custom_audio: bool,
    pub auto_subscribe_audio: bool,
    pub enable_audio_recording_or_playout: bool,
}

impl From<&ChannelOptions> for ChannelMediaOptions {
    fn from(o: &ChannelOptions) -> Self {
        Self {
            publish_microphone: o.publish_microphone,
            publish_media_player_audio: o.publish_media_player_audio,
            publish_direct_custom_audio: o.publish_direct_custom_audio,
            auto_subscribe_audio: o.auto_subscribe_audio,
            enable_audio_recording_or_playout: o.enable_audio_recording_or_playout,
        }
    }
}

/// Recorded PCM frame exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct AudioFrameData {
    pub data: Vec<u8>,
    pub samples_per_channel: u32,
    pub channels: u32,
    pub sample_rate: u32,
}

impl From<AudioFrameData> for AudioFrame {
    fn from(f: AudioFrameData) -> Self {
        Self {
            data: f.data,
            samples_per_channel: f.samples_per_channel,
            channels: f.channels,
            sample_rate: f.sample_rate,
        }
    }
}

impl From<&AudioFrame> for AudioFrameData {
    fn from(f: &AudioFrame) -> Self {
        Self {
            data: f.data.clone(),
            samples_per_channel: f.samples_per_channel,
            channels: f.channels,
            sample_rate: f.sample_rate,
        }
    }
}

/// Session configuration. Unset tunables take their defaults.
#[derive(Debug, Clone, uniffi::Record)]
pub struct SessionConfig {
    pub channel_name: String,
    pub local_uid: u32,
    pub chorus_channel_suffix: Option<String>,
    pub tick_interval_ms: Option<u64>,
    pub staleness_window_ms: Option<i64>,
    pub drift_threshold_ms: Option<i64>,
    pub singing_remote_volume: Option<i32>,
    pub chorus_join_timeout_ms: Option<u64>,
    pub content_timeout_ms: Option<u64>,
}

impl From<SessionConfig> for KtvConfig {
    fn from(c: SessionConfig) -> Self {
        let mut config = KtvConfig::new(c.channel_name, c.local_uid);
        if let Some(suffix) = c.chorus_channel_suffix {
            config.chorus_channel_suffix = suffix;
        }
        if let Some(v) = c.tick_interval_ms {
            config.tick_interval_ms = v;
        }
        if let Some(v) = c.staleness_window_ms {
            config.staleness_window_ms = v;
        }
        if let Some(v) = c.drift_threshold_ms {
            config.drift_threshold_ms = v;
        }
        if let Some(v) = c.singing_remote_volume {
            config.singing_remote_volume = v;
        }
        if let Some(v) = c.chorus_join_timeout_ms {
            config.chorus_join_timeout_ms = v;
        }
        if let Some(v) = c.content_timeout_ms {
            config.content_timeout_ms = v;
        }
        config
    }
}

/// Callback interface for engine events
#[uniffi::export(callback_interface)]
pub trait KtvEventCallback: Send + Sync {
    fn on_load_success(&self, song_code: String, lyric_url: String);
    fn on_load_failure(&self, song_code: String, reason: LoadFailReason);
    fn on_player_state_changed(&self, state: MediaPlayerState, is_local: bool);
    fn on_role_changed(&self, old_role: SingRole, new_role: SingRole);
    /// Result of a `switch_role` request; `reason` is set on failure
    fn on_switch_role_result(&self, target: SingRole, reason: Option<SwitchRoleFailReason>);
    fn on_prelude_end_reached(&self);
    fn on_song_end_reached(&self);
    fn on_score_updated(&self, line_score: i32, cumulative_score: i32);
    fn on_position_updated(&self, position_ms: i64, pitch: f64);
}

/// Real-time engine on the host side. Calls return the engine's status code,
/// 0 on success. `join_secondary_channel` completes through
/// `KtvSession::on_secondary_channel_joined`.
#[uniffi::export(callback_interface)]
pub trait ForeignRtcEngine: Send + Sync {
    fn join_secondary_channel(&self, channel_id: String, token: String, uid: u32, options: ChannelMediaOptions) -> i32;
    fn leave_secondary_channel(&self) -> i32;
    fn update_channel_options(&self, options: ChannelMediaOptions) -> i32;
    fn update_secondary_channel_options(&self, options: ChannelMediaOptions) -> i32;
    fn send_stream_message(&self, data: Vec<u8>) -> i32;
    /// Raw NTP time in ms, 0 when unavailable
    fn ntp_time_ms(&self) -> i64;
    fn set_recording_audio_frame_parameters(&self, sample_rate: u32, channels: u32, samples_per_call: u32) -> i32;
    fn enable_direct_external_audio_source(&self, enabled: bool) -> i32;
    fn push_direct_audio_frame(&self, frame: AudioFrameData) -> i32;
    fn mute_remote_audio_stream(&self, uid: u32, muted: bool) -> i32;
    fn set_audio_scenario(&self, scenario: AudioScenarioKind) -> i32;
    fn adjust_playback_signal_volume(&self, volume: i32) -> i32;
    fn select_audio_track(&self, index: i32) -> i32;
}

/// Song catalog on the host side. Lyric lookups complete through
/// `KtvSession::on_lyric_result`, preloads through
/// `KtvSession::on_preload_result`.
#[uniffi::export(callback_interface)]
pub trait ForeignContentCenter: Send + Sync {
    /// Start a lyric lookup and return its request id
    fn get_lyric(&self, song_code: String) -> String;
    fn is_preloaded(&self, song_code: String) -> bool;
    /// Start a preload; non-zero means it could not be started
    fn preload(&self, song_code: String) -> i32;
}

/// Media player on the host side. State and position changes come back
/// through `KtvSession::on_player_state_changed` and
/// `KtvSession::on_player_position_changed`.
#[uniffi::export(callback_interface)]
pub trait ForeignMediaPlayer: Send + Sync {
    fn open(&self, song_code: String, start_position_ms: i64);
    fn play(&self);
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    fn seek(&self, position_ms: i64);
    fn position_ms(&self) -> i64;
    fn duration_ms(&self) -> i64;
    fn state(&self) -> MediaPlayerState;
}
