//! Session implementation for FFI

use std::sync::{Arc, Once};

use parking_lot::RwLock;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::config::KtvConfig;
use crate::rtc::MediaPlayer;
use crate::session::{Collaborators, KtvEngine, SongRequest};

use super::adapters::{ContentAdapter, PlayerAdapter, RtcAdapter};
use super::handlers::{forward_events, SharedCallback};
use super::types::*;

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let mut filter = tracing_subscriber::EnvFilter::from_default_env();
        for directive in ["ktv_core=debug", "uniffi=info"] {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        let _ = tracing_subscriber::fmt()
            .with_ansi(false) // Disable colors for Xcode / logcat
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

/// Main session interface
#[derive(uniffi::Object)]
pub struct KtvSession {
    runtime: Runtime,
    engine: KtvEngine,
    rtc: Arc<RtcAdapter>,
    content: Arc<ContentAdapter>,
    callback: SharedCallback,
}

#[uniffi::export]
impl KtvSession {
    /// Create a session driving the host's engine, content center and player
    #[uniffi::constructor]
    pub fn new(
        config: SessionConfig,
        rtc: Box<dyn ForeignRtcEngine>,
        content: Box<dyn ForeignContentCenter>,
        player: Box<dyn ForeignMediaPlayer>,
    ) -> Result<Arc<Self>, CoreError> {
        init_tracing();
        info!("Initializing ktv-core session");

        let config = KtvConfig::from(config);
        let runtime = Runtime::new().map_err(|e| CoreError::Runtime(e.to_string()))?;

        let rtc = Arc::new(RtcAdapter::new(
            Arc::from(rtc),
            config.local_uid,
            config.chorus_join_timeout(),
        ));
        let content = Arc::new(ContentAdapter::new(Arc::from(content), config.content_timeout()));
        let player: Arc<dyn MediaPlayer> = Arc::new(PlayerAdapter::new(Arc::from(player)));

        let engine = KtvEngine::new(config, Collaborators::new(rtc.clone(), content.clone(), player))?;

        let callback: SharedCallback = Arc::new(RwLock::new(None));
        runtime.spawn(forward_events(engine.subscribe(), Arc::clone(&callback)));

        Ok(Arc::new(Self {
            runtime,
            engine,
            rtc,
            content,
            callback,
        }))
    }

    /// Set the event callback
    pub fn set_callback(&self, callback: Box<dyn KtvEventCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    pub fn role(&self) -> SingRole {
        self.engine.role().into()
    }

    /// Load a song; the outcome arrives as `on_load_success` or
    /// `on_load_failure`
    pub fn load_song(&self, song_code: String, auto_play: bool, main_singer_uid: u32, role: SingRole) {
        let engine = self.engine.clone();
        let request = SongRequest {
            song_code,
            auto_play,
            main_singer_uid,
            role: role.into(),
        };
        self.runtime.spawn(async move {
            if let Err(e) = engine.load_song(request).await {
                debug!("load_song finished with {}", e);
            }
        });
    }

    /// Request a role change; the outcome arrives as `on_switch_role_result`
    pub fn switch_role(&self, target: SingRole, token: String) {
        let engine = self.engine.clone();
        let callback = Arc::clone(&self.callback);
        self.runtime.spawn(async move {
            let reason = match engine.switch_role(target.into(), &token).await {
                Ok(_) => None,
                Err(e) => {
                    warn!("switch_role to {:?} failed: {}", target, e);
                    Some(SwitchRoleFailReason::from(e))
                }
            };
            let cb = callback.read().clone();
            if let Some(cb) = cb {
                cb.on_switch_role_result(target, reason);
            }
        });
    }

    pub fn start_sing(&self) -> Result<(), CoreError> {
        Ok(self.engine.start()?)
    }

    pub fn pause_sing(&self) -> Result<(), CoreError> {
        Ok(self.engine.pause()?)
    }

    pub fn resume_sing(&self) -> Result<(), CoreError> {
        Ok(self.engine.resume()?)
    }

    pub fn seek_sing(&self, position_ms: i64) -> Result<(), CoreError> {
        Ok(self.engine.seek(position_ms)?)
    }

    /// Stop the song and leave the chorus; blocks until torn down
    pub fn stop_sing(&self) {
        self.runtime.block_on(self.engine.stop());
    }

    pub fn set_mic_muted(&self, muted: bool) {
        self.engine.set_mic_muted(muted);
    }

    pub fn set_lyric_boundaries(&self, prelude_end_ms: i64, song_end_ms: i64) {
        self.engine.set_lyric_boundaries(prelude_end_ms, song_end_ms);
    }

    pub fn report_line_score(&self, line_score: i32, cumulative_score: i32, line_count: i32) {
        self.engine.report_line_score(line_score, cumulative_score, line_count);
    }

    pub fn average_score(&self) -> i32 {
        self.engine.average_score()
    }

    pub fn adjust_remote_volume(&self, volume: i32) {
        self.engine.adjust_remote_volume(volume);
    }

    pub fn select_track_mode(&self, mode: TrackModeKind) {
        self.engine.select_track_mode(mode.into());
    }

    pub fn skip_prelude_or_outro(&self) -> bool {
        self.engine.skip_prelude_or_outro()
    }

    // Host engine callbacks

    /// Chorus channel join finished; `code` is 0 on success
    pub fn on_secondary_channel_joined(&self, channel_id: String, code: i32) {
        self.rtc.complete_join(&channel_id, code);
    }

    /// Lyric lookup finished; `lyric_url` is empty when there is none
    pub fn on_lyric_result(&self, request_id: String, lyric_url: String) {
        let url = (!lyric_url.is_empty()).then_some(lyric_url);
        self.content.complete_lyric(&request_id, url);
    }

    /// Preload finished; `status` is 0 once the asset is on disk
    pub fn on_preload_result(&self, song_code: String, status: i32) {
        self.content.complete_preload(&song_code, status);
    }

    pub fn on_stream_message(&self, uid: u32, data: Vec<u8>) {
        self.engine.on_side_channel_message(uid, &data);
    }

    pub fn on_local_audio_stats(&self, playout_delay_ms: i64) {
        self.engine.on_local_audio_stats(playout_delay_ms);
    }

    pub fn on_local_pitch(&self, pitch: f64) {
        self.engine.on_local_pitch(pitch);
    }

    pub fn on_record_audio_frame(&self, frame: AudioFrameData) {
        self.engine.on_record_audio_frame(&frame.into());
    }

    pub fn on_player_state_changed(&self, state: MediaPlayerState) {
        self.engine.on_player_state_changed(state.into());
    }

    pub fn on_player_position_changed(&self, position_ms: i64) {
        self.engine.on_player_position_changed(position_ms);
    }
}
