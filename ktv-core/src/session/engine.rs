//! Playback session
//!
//! `KtvEngine` coordinates the role machine, the resource loader and the sync
//! codec around one local media player. Collaborator callbacks (player state
//! and position, side-channel messages, audio stats) are fed in through the
//! `on_*` methods and events go out on a broadcast channel.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, KtvConfig};
use crate::loader::{LoadError, LoadScope, LoadedSong, ResourceLoader};
use crate::role::{Role, RoleMachine, SongContext, SwitchRoleError, Transition};
use crate::rtc::{log_failure, AudioFrame, ContentCenter, MediaPlayer, PlayerState, RtcTransport, TrackMode};
use crate::sync::{
    normalize_network_time, DriftSample, LrcTimeTick, PositionAnchor, RemoteClockSample, SyncMessage, SystemClock,
    WallClock,
};

use super::events::KtvEvent;
use super::song::{LoadState, LyricBoundaries, ScoreBook, SongRequest, SongSession};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Skipping lands this far ahead of the prelude end or the song end
const SKIP_MARGIN_MS: i64 = 500;

/// Full playback volume of other users
const FULL_REMOTE_VOLUME: i32 = 100;

/// Playback state as seen by the UI, mirroring the local player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    OpenPending,
    Playing,
    Paused,
    Stopped,
}

impl SessionState {
    fn from_player(state: PlayerState) -> Self {
        match state {
            PlayerState::Idle => SessionState::Idle,
            PlayerState::Opening | PlayerState::OpenCompleted => SessionState::OpenPending,
            PlayerState::Playing => SessionState::Playing,
            PlayerState::Paused => SessionState::Paused,
            PlayerState::PlaybackCompleted
            | PlayerState::PlaybackAllLoopsCompleted
            | PlayerState::Stopped
            | PlayerState::Failed => SessionState::Stopped,
        }
    }
}

/// Errors from the local playback controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("No song loaded")]
    NoSong,

    #[error("Song has not finished loading")]
    SongNotReady,

    #[error("Only a solo or lead singer controls playback (role is {0:?})")]
    NotMainSinger(Role),
}

/// External collaborators an engine drives
pub struct Collaborators {
    pub transport: Arc<dyn RtcTransport>,
    pub content: Arc<dyn ContentCenter>,
    pub player: Arc<dyn MediaPlayer>,
    pub clock: Arc<dyn WallClock>,
}

impl Collaborators {
    pub fn new(
        transport: Arc<dyn RtcTransport>,
        content: Arc<dyn ContentCenter>,
        player: Arc<dyn MediaPlayer>,
    ) -> Self {
        Self {
            transport,
            content,
            player,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Mutable per-engine playback state, guarded by one lock
pub(super) struct PlaybackState {
    pub(super) session_state: SessionState,
    pub(super) song: Option<SongSession>,
    pub(super) local_state: PlayerState,
    pub(super) anchor: PositionAnchor,
    pub(super) remote: Option<RemoteClockSample>,
    pub(super) boundaries: LyricBoundaries,
    pub(super) score: ScoreBook,
    pub(super) playout_delay_ms: i64,
    pub(super) pitch: f64,
    pub(super) mic_muted: bool,
    pub(super) remote_volume: i32,
    next_attempt: u64,
}

impl PlaybackState {
    fn new(remote_volume: i32) -> Self {
        Self {
            session_state: SessionState::Idle,
            song: None,
            local_state: PlayerState::Idle,
            anchor: PositionAnchor::default(),
            remote: None,
            boundaries: LyricBoundaries::default(),
            score: ScoreBook::default(),
            playout_delay_ms: 0,
            pitch: 0.0,
            mic_muted: false,
            remote_volume,
            next_attempt: 0,
        }
    }

    fn song_ready(&self) -> bool {
        self.song.as_ref().is_some_and(SongSession::is_ready)
    }
}

pub(super) struct EngineInner {
    pub(super) config: Arc<KtvConfig>,
    pub(super) transport: Arc<dyn RtcTransport>,
    pub(super) player: Arc<dyn MediaPlayer>,
    pub(super) clock: Arc<dyn WallClock>,
    pub(super) loader: ResourceLoader,
    pub(super) roles: RoleMachine,
    pub(super) playback: Mutex<PlaybackState>,
    pub(super) events: broadcast::Sender<KtvEvent>,
    pub(super) ticker_cancel: Mutex<Option<oneshot::Sender<()>>>,
}

/// Karaoke sync engine for one local participant. Cheap to clone.
#[derive(Clone)]
pub struct KtvEngine {
    inner: Arc<EngineInner>,
}

impl KtvEngine {
    pub fn new(config: KtvConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        let Collaborators {
            transport,
            content,
            player,
            clock,
        } = collaborators;

        let loader = ResourceLoader::new(content);
        let roles = RoleMachine::new(
            Arc::clone(&config),
            Arc::clone(&transport),
            Arc::clone(&player),
            loader.clone(),
        );
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            "Engine created for channel {} as uid {}",
            config.channel_name, config.local_uid
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                playback: Mutex::new(PlaybackState::new(config.singing_remote_volume)),
                config,
                transport,
                player,
                clock,
                loader,
                roles,
                events,
                ticker_cancel: Mutex::new(None),
            }),
        })
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<KtvEvent> {
        self.inner.events.subscribe()
    }

    pub fn role(&self) -> Role {
        self.inner.roles.role()
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.playback.lock().session_state
    }

    pub fn config(&self) -> &KtvConfig {
        &self.inner.config
    }

    /// Load a song for `request.role`.
    ///
    /// Replaces any current song. A result arriving after the song was
    /// replaced or stopped is dropped and reported as `Cancelled` without an
    /// event.
    pub async fn load_song(&self, request: SongRequest) -> Result<LoadedSong, LoadError> {
        let inner = &self.inner;
        let attempt_id = {
            let mut pb = inner.playback.lock();
            pb.next_attempt += 1;
            let attempt_id = pb.next_attempt;
            let same_song = pb.song.as_ref().is_some_and(|s| s.song_code == request.song_code);
            if !same_song {
                pb.boundaries = LyricBoundaries::default();
                pb.score = ScoreBook::default();
                pb.remote = None;
            }
            pb.song = Some(SongSession::new(attempt_id, &request));
            attempt_id
        };
        inner.start_ticker();

        info!(
            "Loading song {} for {:?} (attempt {})",
            request.song_code, request.role, attempt_id
        );
        let result = inner
            .loader
            .load(&request.song_code, LoadScope::for_role(request.role))
            .await;

        let auto_play = {
            let mut pb = inner.playback.lock();
            let Some(song) = pb.song.as_mut().filter(|s| s.attempt_id == attempt_id) else {
                debug!("Dropping stale load result for {}", request.song_code);
                return Err(LoadError::Cancelled);
            };
            match &result {
                Ok(loaded) => {
                    song.lyric_url = loaded.lyric_url.clone();
                    song.load_state.advance(LoadState::Ready);
                }
                Err(e) => {
                    song.load_state.advance(LoadState::Failed(*e));
                }
            }
            song.auto_play
        };

        match &result {
            Ok(loaded) => {
                inner.emit(KtvEvent::LoadSuccess {
                    song_code: request.song_code.clone(),
                    lyric_url: loaded.lyric_url.clone().unwrap_or_default(),
                });
                if auto_play && inner.roles.role() == Role::SoloSinger {
                    if let Err(e) = self.start() {
                        warn!("Auto-play of {} failed: {}", request.song_code, e);
                    }
                }
            }
            Err(reason) => inner.emit(KtvEvent::LoadFailure {
                song_code: request.song_code.clone(),
                reason: *reason,
            }),
        }
        result
    }

    /// Request a role change. The current song, if any, is what chorus joins
    /// preload and what a co-singer opens.
    pub async fn switch_role(&self, target: Role, token: &str) -> Result<Transition, SwitchRoleError> {
        let inner = &self.inner;
        let song = inner.playback.lock().song.as_ref().map(|s| SongContext {
            song_code: s.song_code.clone(),
            main_singer_uid: s.main_singer_uid,
        });

        let transition = inner.roles.switch_role(target, token, song.as_ref()).await?;

        if target == Role::Audience {
            inner.drop_song();
        } else if target == Role::CoSinger {
            // Ticks heard as audience say nothing about the player just opened
            inner.playback.lock().remote = None;
        }
        inner.refresh_remote_volume();
        inner.emit(KtvEvent::RoleChanged {
            old: transition.source(),
            new: transition.target(),
        });
        Ok(transition)
    }

    /// Open the loaded song in the local player. Playback begins once the
    /// player reports `OpenCompleted`.
    pub fn start(&self) -> Result<(), PlaybackError> {
        let inner = &self.inner;
        inner.require_main_singer()?;
        let now = inner.clock.now_ms();

        let song_code = {
            let mut pb = inner.playback.lock();
            let song_code = match pb.song.as_ref() {
                None => return Err(PlaybackError::NoSong),
                Some(song) if !song.is_ready() => return Err(PlaybackError::SongNotReady),
                Some(song) => song.song_code.clone(),
            };
            pb.session_state = SessionState::OpenPending;
            pb.boundaries.rearm();
            pb.anchor = PositionAnchor::frozen(0, now);
            song_code
        };

        info!("Starting song {}", song_code);
        inner.player.open(&song_code, 0);
        Ok(())
    }

    pub fn pause(&self) -> Result<(), PlaybackError> {
        self.inner.require_main_singer()?;
        self.inner.player.pause();
        Ok(())
    }

    /// Resume a paused player, otherwise start playing
    pub fn resume(&self) -> Result<(), PlaybackError> {
        self.inner.require_main_singer()?;
        if self.inner.player.state() == PlayerState::Paused {
            self.inner.player.resume();
        } else {
            self.inner.player.play();
        }
        Ok(())
    }

    pub fn seek(&self, position_ms: i64) -> Result<(), PlaybackError> {
        let inner = &self.inner;
        inner.require_main_singer()?;
        inner.player.seek(position_ms);
        inner.set_anchor(position_ms);
        Ok(())
    }

    /// Stop the song and tear down chorus membership.
    ///
    /// Cancels the scheduler and drops the song, so a load still in flight
    /// completes as a no-op. A lead singer falls back to solo and a
    /// co-singer to audience.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.stop_ticker();
        let had_song = inner.playback.lock().song.take().is_some();

        if !matches!(inner.player.state(), PlayerState::Idle | PlayerState::Stopped) {
            inner.player.stop();
        }

        let demote_to = match inner.roles.role() {
            Role::LeadSinger => Some(Role::SoloSinger),
            Role::CoSinger => Some(Role::Audience),
            Role::Audience | Role::SoloSinger => None,
        };
        if let Some(target) = demote_to {
            if let Err(e) = self.switch_role(target, "").await {
                warn!("Leaving chorus on stop failed: {}", e);
            }
        }

        {
            let mut pb = inner.playback.lock();
            pb.song = None;
            pb.remote = None;
            pb.boundaries = LyricBoundaries::default();
            pb.session_state = SessionState::Stopped;
            pb.anchor = PositionAnchor::default();
            pb.pitch = 0.0;
        }
        log_failure(
            "adjust_playback_signal_volume",
            inner.transport.adjust_playback_signal_volume(FULL_REMOTE_VOLUME),
        );
        info!("Session stopped (had song: {})", had_song);
    }

    /// Local player state callback
    pub fn on_player_state_changed(&self, state: PlayerState) {
        let inner = &self.inner;
        let now = inner.clock.now_ms();
        let position = inner.player.position_ms();
        let role = inner.roles.role();
        debug!("Local player state {:?} as {:?}", state, role);

        {
            let mut pb = inner.playback.lock();
            pb.local_state = state;
            pb.anchor = if state == PlayerState::Playing {
                PositionAnchor::running(position, now)
            } else {
                PositionAnchor::frozen(position, now)
            };
            pb.session_state = SessionState::from_player(state);
        }

        if role.is_main_singer() {
            if state == PlayerState::OpenCompleted {
                inner.player.play();
            }
            inner.send(&SyncMessage::PlayerState {
                state,
                user_id: inner.config.local_uid,
            });
        } else if role == Role::CoSinger && state == PlayerState::OpenCompleted {
            // Catch up with a main singer who is already under way
            let remote = inner.playback.lock().remote.as_ref().map(|r| r.player_state);
            if let Some(remote) = remote {
                inner.follow_remote_state(remote);
            }
        }

        inner.refresh_remote_volume();
        inner.emit(KtvEvent::PlayerStateChanged { state, is_local: true });
    }

    /// Local player position callback
    pub fn on_player_position_changed(&self, position_ms: i64) {
        self.inner.set_anchor(position_ms);
    }

    /// Inbound side-channel message. Undecodable payloads are dropped.
    pub fn on_side_channel_message(&self, sender_uid: u32, payload: &[u8]) {
        let inner = &self.inner;
        let message = match SyncMessage::decode(payload) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Ignoring unknown sync command from {}", sender_uid);
                return;
            }
            Err(e) => {
                debug!("Dropping sync message from {}: {}", sender_uid, e);
                return;
            }
        };

        let role = inner.roles.role();
        if role.is_main_singer() {
            return;
        }
        if !inner.playback.lock().song_ready() {
            debug!("No song ready, ignoring sync message from {}", sender_uid);
            return;
        }

        match message {
            SyncMessage::LrcTime(tick) => inner.handle_tick(role, &tick),
            SyncMessage::PlayerState { state, user_id } => {
                debug!("Remote player state {:?} from {}", state, user_id);
                if let Some(remote) = inner.playback.lock().remote.as_mut() {
                    remote.player_state = state;
                }
                if role == Role::CoSinger {
                    inner.follow_remote_state(state);
                }
                inner.emit(KtvEvent::PlayerStateChanged { state, is_local: false });
            }
        }
    }

    /// Local audio stats callback carrying the device playout delay
    pub fn on_local_audio_stats(&self, playout_delay_ms: i64) {
        self.inner.playback.lock().playout_delay_ms = playout_delay_ms.max(0);
    }

    /// Local voice pitch from the volume indication
    pub fn on_local_pitch(&self, pitch: f64) {
        let role = self.inner.roles.role();
        let mut pb = self.inner.playback.lock();
        if role == Role::Audience || pb.session_state != SessionState::Playing {
            return;
        }
        pb.pitch = if pb.mic_muted { 0.0 } else { pitch };
    }

    pub fn set_mic_muted(&self, muted: bool) {
        self.inner.playback.lock().mic_muted = muted;
    }

    /// Captured microphone frame; forwarded to the chorus channel while this
    /// participant publishes a direct track
    pub fn on_record_audio_frame(&self, frame: &AudioFrame) {
        if !self.inner.roles.publishes_direct_audio() {
            return;
        }
        if let Err(e) = self.inner.transport.push_direct_audio_frame(frame) {
            debug!("Pushing recorded frame failed: {}", e);
        }
    }

    /// Lyric boundaries of the current song, from the parsed lyric document
    pub fn set_lyric_boundaries(&self, prelude_end_ms: i64, song_end_ms: i64) {
        self.inner.playback.lock().boundaries = LyricBoundaries::new(prelude_end_ms, song_end_ms);
    }

    pub fn report_line_score(&self, line_score: i32, cumulative_score: i32, line_count: i32) {
        self.inner.playback.lock().score = ScoreBook {
            line_count,
            cumulative: cumulative_score,
        };
        self.inner.emit(KtvEvent::ScoreUpdated {
            line_score,
            cumulative_score,
        });
    }

    pub fn average_score(&self) -> i32 {
        self.inner.playback.lock().score.average()
    }

    /// Jump over the prelude, or over the outro once the last lyric line has
    /// passed. Returns whether a seek happened.
    pub fn skip_prelude_or_outro(&self) -> bool {
        let inner = &self.inner;
        if inner.require_main_singer().is_err() {
            return false;
        }
        let boundaries = inner.playback.lock().boundaries;
        let current = inner.player.position_ms();

        let target = match (boundaries.prelude_end_ms, boundaries.song_end_ms) {
            (Some(prelude_end), _) if current < prelude_end - SKIP_MARGIN_MS => prelude_end - SKIP_MARGIN_MS,
            (_, Some(song_end)) if current > song_end => {
                let end = inner.player.duration_ms() - SKIP_MARGIN_MS;
                if current >= end {
                    return false;
                }
                end
            }
            _ => return false,
        };

        info!("Skipping from {} to {}", current, target);
        inner.player.seek(target);
        inner.set_anchor(target);
        true
    }

    /// Volume of other users while a local song plays
    pub fn adjust_remote_volume(&self, volume: i32) {
        self.inner.playback.lock().remote_volume = volume;
        self.inner.refresh_remote_volume();
    }

    pub fn select_track_mode(&self, mode: TrackMode) {
        log_failure(
            "select_audio_track",
            self.inner.transport.select_audio_track(mode.track_index()),
        );
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

impl EngineInner {
    pub(super) fn emit(&self, event: KtvEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Transport network time in Unix ms
    pub(super) fn network_time_ms(&self) -> i64 {
        normalize_network_time(self.transport.current_network_time_ms(), self.clock.as_ref())
    }

    pub(super) fn send(&self, message: &SyncMessage) {
        match message.encode() {
            Ok(payload) => {
                if let Err(e) = self.transport.send_side_channel_message(&payload) {
                    debug!("Sending sync message failed: {}", e);
                }
            }
            Err(e) => warn!("Encoding sync message failed: {}", e),
        }
    }

    fn require_main_singer(&self) -> Result<(), PlaybackError> {
        let role = self.roles.role();
        if role.is_main_singer() {
            Ok(())
        } else {
            Err(PlaybackError::NotMainSinger(role))
        }
    }

    fn set_anchor(&self, position_ms: i64) {
        let now = self.clock.now_ms();
        let mut pb = self.playback.lock();
        pb.anchor = if pb.local_state == PlayerState::Playing {
            PositionAnchor::running(position_ms, now)
        } else {
            PositionAnchor::frozen(position_ms, now)
        };
    }

    /// Forget the current song after dropping to audience
    fn drop_song(&self) {
        self.stop_ticker();
        let mut pb = self.playback.lock();
        if pb.song.take().is_some() {
            pb.session_state = SessionState::Stopped;
        }
        pb.remote = None;
        pb.boundaries = LyricBoundaries::default();
    }

    /// Other users play quieter while a local song plays; audience always
    /// hears them at full volume
    fn refresh_remote_volume(&self) {
        let role = self.roles.role();
        let volume = {
            let pb = self.playback.lock();
            if role == Role::Audience || pb.local_state != PlayerState::Playing {
                FULL_REMOTE_VOLUME
            } else {
                pb.remote_volume
            }
        };
        log_failure(
            "adjust_playback_signal_volume",
            self.transport.adjust_playback_signal_volume(volume),
        );
    }

    fn handle_tick(&self, role: Role, tick: &LrcTimeTick) {
        let now = self.clock.now_ms();
        let (state_changed, local_state) = {
            let mut pb = self.playback.lock();
            let previous = pb.remote.as_ref().map(|r| r.player_state);
            pb.remote = Some(RemoteClockSample::from_tick(tick, now));
            if role == Role::Audience {
                pb.pitch = tick.pitch;
            }
            (previous != Some(tick.player_state), pb.local_state)
        };

        // A co-singer tracks the main singer against its own player; one
        // still opening catches up on OpenCompleted instead
        if role == Role::CoSinger
            && local_state != tick.player_state
            && !matches!(local_state, PlayerState::Idle | PlayerState::Opening)
        {
            self.follow_remote_state(tick.player_state);
        }
        if state_changed {
            self.emit(KtvEvent::PlayerStateChanged {
                state: tick.player_state,
                is_local: false,
            });
        }

        if role == Role::CoSinger && tick.player_state == PlayerState::Playing {
            self.correct_drift(tick, now);
        }
    }

    fn correct_drift(&self, tick: &LrcTimeTick, now: i64) {
        let (local_position_ms, local_playout_delay_ms) = {
            let pb = self.playback.lock();
            if pb.local_state != PlayerState::Playing {
                return;
            }
            (pb.anchor.position_at(now), pb.playout_delay_ms)
        };

        let correction = DriftSample {
            sender_position_ms: tick.position_ms,
            sender_network_time_ms: tick.network_time_ms,
            local_network_time_ms: self.network_time_ms(),
            local_playout_delay_ms,
            local_position_ms,
        }
        .evaluate(self.config.drift_threshold_ms);

        if correction.should_seek {
            let duration = if tick.duration_ms > 0 {
                tick.duration_ms
            } else {
                self.player.duration_ms()
            };
            let target = correction.expected_position_ms.clamp(0, duration.max(0));
            debug!("Drift {} ms, seeking to {}", correction.drift_ms, target);
            self.player.seek(target);
            self.playback.lock().anchor = PositionAnchor::running(target, now);
        }
    }

    /// Keep a co-singer's player in the same state as the main singer's
    fn follow_remote_state(&self, state: PlayerState) {
        match state {
            PlayerState::Stopped => {
                if self.player.state() != PlayerState::Stopped {
                    self.player.stop();
                }
            }
            PlayerState::Paused => self.player.pause(),
            PlayerState::Playing => match self.player.state() {
                PlayerState::Paused => self.player.resume(),
                PlayerState::Playing => {}
                _ => self.player.play(),
            },
            _ => {}
        }
    }
}
