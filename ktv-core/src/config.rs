//! Engine configuration
//!
//! Every tunable has a default, so a config only needs the main channel name
//! and the local uid.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a config
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Channel name must not be empty")]
    EmptyChannelName,

    #[error("Tick interval must be greater than zero")]
    ZeroTickInterval,
}

/// Recorded audio frame parameters used when a lead singer pushes its
/// microphone into the chorus channel as a direct track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u32,
    #[serde(default = "default_samples_per_call")]
    pub samples_per_call: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            samples_per_call: default_samples_per_call(),
        }
    }
}

const fn default_sample_rate() -> u32 {
    48_000
}

const fn default_channels() -> u32 {
    2
}

const fn default_samples_per_call() -> u32 {
    960
}

/// Configuration for one [`crate::KtvEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KtvConfig {
    /// Main (conversational) channel name
    pub channel_name: String,
    /// Uid used in both the main and the chorus channel
    pub local_uid: u32,
    /// Appended to the main channel name to form the chorus channel id
    #[serde(default = "default_chorus_suffix")]
    pub chorus_channel_suffix: String,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Audience stops extrapolating once the last broadcast is older than this
    #[serde(default = "default_staleness_window")]
    pub staleness_window_ms: i64,
    /// Co-singers seek only when drift exceeds this
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold_ms: i64,
    /// Prelude-end fires this far ahead of the lyric's first line
    #[serde(default = "default_prelude_lead")]
    pub prelude_lead_ms: i64,
    /// Playback volume of other users while a local song is playing
    #[serde(default = "default_singing_remote_volume")]
    pub singing_remote_volume: i32,
    /// Upper bound on waiting for the chorus join callback
    #[serde(default = "default_chorus_join_timeout")]
    pub chorus_join_timeout_ms: u64,
    /// Upper bound on waiting for a lyric lookup or preload callback
    #[serde(default = "default_content_timeout")]
    pub content_timeout_ms: u64,
    #[serde(default)]
    pub recording: RecordingConfig,
}

fn default_chorus_suffix() -> String {
    "_ex".into()
}

const fn default_tick_interval() -> u64 {
    20
}

const fn default_staleness_window() -> i64 {
    1000
}

const fn default_drift_threshold() -> i64 {
    40
}

const fn default_prelude_lead() -> i64 {
    500
}

const fn default_singing_remote_volume() -> i32 {
    15
}

const fn default_chorus_join_timeout() -> u64 {
    10_000
}

const fn default_content_timeout() -> u64 {
    60_000
}

impl KtvConfig {
    /// Create a config with default tunables
    pub fn new(channel_name: impl Into<String>, local_uid: u32) -> Self {
        Self {
            channel_name: channel_name.into(),
            local_uid,
            chorus_channel_suffix: default_chorus_suffix(),
            tick_interval_ms: default_tick_interval(),
            staleness_window_ms: default_staleness_window(),
            drift_threshold_ms: default_drift_threshold(),
            prelude_lead_ms: default_prelude_lead(),
            singing_remote_volume: default_singing_remote_volume(),
            chorus_join_timeout_ms: default_chorus_join_timeout(),
            content_timeout_ms: default_content_timeout(),
            recording: RecordingConfig::default(),
        }
    }

    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_name.trim().is_empty() {
            return Err(ConfigError::EmptyChannelName);
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        Ok(())
    }

    /// Id of the secondary channel singers join for chorus
    #[must_use]
    pub fn chorus_channel_id(&self) -> String {
        format!("{}{}", self.channel_name, self.chorus_channel_suffix)
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub const fn chorus_join_timeout(&self) -> Duration {
        Duration::from_millis(self.chorus_join_timeout_ms)
    }

    #[must_use]
    pub const fn content_timeout(&self) -> Duration {
        Duration::from_millis(self.content_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config = KtvConfig::from_json_str(r#"{"channel_name":"room42","local_uid":7}"#).unwrap();

        assert_eq!(config, KtvConfig::new("room42", 7));
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
        assert_eq!(config.drift_threshold_ms, 40);
        assert_eq!(config.staleness_window_ms, 1000);
        assert_eq!(config.recording.sample_rate, 48_000);
        assert_eq!(config.recording.samples_per_call, 960);
        assert_eq!(config.content_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_chorus_channel_id() {
        let config = KtvConfig::new("room42", 7);
        assert_eq!(config.chorus_channel_id(), "room42_ex");
    }

    #[test]
    fn test_overrides_and_partial_recording() {
        let json = r#"{
            "channel_name": "r",
            "local_uid": 1,
            "drift_threshold_ms": 80,
            "recording": { "channels": 1 }
        }"#;
        let config = KtvConfig::from_json_str(json).unwrap();

        assert_eq!(config.drift_threshold_ms, 80);
        assert_eq!(config.recording.channels, 1);
        assert_eq!(config.recording.sample_rate, 48_000);
    }

    #[test]
    fn test_validation_errors() {
        let err = KtvConfig::from_json_str(r#"{"channel_name":"  ","local_uid":1}"#).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyChannelName));

        let err = KtvConfig::from_json_str(r#"{"channel_name":"r","local_uid":1,"tick_interval_ms":0}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTickInterval));

        let err = KtvConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
