//! In-memory collaborators for unit tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::KtvConfig;
use crate::rtc::{
    AudioFrame, AudioScenario, ChannelOptions, ContentCenter, ContentError, MediaPlayer, PlayerState, RtcTransport,
    TransportError,
};
use crate::session::{Collaborators, KtvEngine};
use crate::sync::{SyncMessage, WallClock};

pub const LOCAL_UID: u32 = 1001;
pub const LEAD_UID: u32 = 2002;

/// Wall clock the test moves by hand
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self(AtomicI64::new(now_ms))
    }

    pub fn set(&self, now_ms: i64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Join { channel_id: String, options: ChannelOptions },
    Leave,
    UpdateMain(ChannelOptions),
    UpdateSecondary(ChannelOptions),
    Send(Vec<u8>),
    RecordingParams(u32, u32, u32),
    DirectSource(bool),
    PushFrame(usize),
    Mute { uid: u32, muted: bool },
    Scenario(AudioScenario),
    Volume(i32),
    SelectTrack(i32),
}

#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
    fail_join: AtomicBool,
    fail_leave: AtomicBool,
    hold_joins: AtomicBool,
    held_join: Mutex<Option<oneshot::Sender<()>>>,
    raw_network_time: AtomicI64,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn set_fail_join(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_leave(&self, fail: bool) {
        self.fail_leave.store(fail, Ordering::SeqCst);
    }

    /// Park every join until [`MockTransport::release_join`]
    pub fn hold_joins(&self) {
        self.hold_joins.store(true, Ordering::SeqCst);
    }

    pub fn release_join(&self) {
        self.hold_joins.store(false, Ordering::SeqCst);
        if let Some(tx) = self.held_join.lock().take() {
            let _ = tx.send(());
        }
    }

    pub fn joins_started(&self) -> usize {
        self.count(|c| matches!(c, TransportCall::Join { .. }))
    }

    /// Raw transport network time (NTP epoch); 0 means unavailable
    pub fn set_raw_network_time(&self, raw_ms: i64) {
        self.raw_network_time.store(raw_ms, Ordering::SeqCst);
    }

    pub fn last_main_options(&self) -> Option<ChannelOptions> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            TransportCall::UpdateMain(options) => Some(*options),
            _ => None,
        })
    }

    pub fn last_volume(&self) -> Option<i32> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            TransportCall::Volume(v) => Some(*v),
            _ => None,
        })
    }

    /// Every side-channel message sent so far, decoded
    pub fn sent_messages(&self) -> Vec<SyncMessage> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                TransportCall::Send(payload) => SyncMessage::decode(payload).ok().flatten(),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TransportCall) -> Result<(), TransportError> {
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl RtcTransport for MockTransport {
    async fn join_secondary_channel(
        &self,
        channel_id: &str,
        _token: &str,
        options: &ChannelOptions,
    ) -> Result<(), TransportError> {
        let held = self.hold_joins.load(Ordering::SeqCst).then(|| {
            let (tx, rx) = oneshot::channel();
            *self.held_join.lock() = Some(tx);
            rx
        });
        self.calls.lock().push(TransportCall::Join {
            channel_id: channel_id.to_string(),
            options: *options,
        });
        if let Some(rx) = held {
            let _ = rx.await;
        }
        if self.fail_join.load(Ordering::SeqCst) {
            Err(TransportError::JoinFailed(-17))
        } else {
            Ok(())
        }
    }

    async fn leave_secondary_channel(&self) -> Result<(), TransportError> {
        self.calls.lock().push(TransportCall::Leave);
        if self.fail_leave.load(Ordering::SeqCst) {
            Err(TransportError::NotJoined)
        } else {
            Ok(())
        }
    }

    fn update_channel_options(&self, options: &ChannelOptions) -> Result<(), TransportError> {
        self.record(TransportCall::UpdateMain(*options))
    }

    fn update_secondary_channel_options(&self, options: &ChannelOptions) -> Result<(), TransportError> {
        self.record(TransportCall::UpdateSecondary(*options))
    }

    fn send_side_channel_message(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.record(TransportCall::Send(payload.to_vec()))
    }

    fn current_network_time_ms(&self) -> i64 {
        self.raw_network_time.load(Ordering::SeqCst)
    }

    fn set_recorded_audio_frame_parameters(
        &self,
        sample_rate: u32,
        channels: u32,
        samples_per_call: u32,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::RecordingParams(sample_rate, channels, samples_per_call))
    }

    fn set_direct_external_audio_source(&self, enabled: bool) -> Result<(), TransportError> {
        self.record(TransportCall::DirectSource(enabled))
    }

    fn push_direct_audio_frame(&self, frame: &AudioFrame) -> Result<(), TransportError> {
        self.record(TransportCall::PushFrame(frame.data.len()))
    }

    fn mute_remote_audio(&self, uid: u32, muted: bool) -> Result<(), TransportError> {
        self.record(TransportCall::Mute { uid, muted })
    }

    fn set_audio_scenario(&self, scenario: AudioScenario) -> Result<(), TransportError> {
        self.record(TransportCall::Scenario(scenario))
    }

    fn adjust_playback_signal_volume(&self, volume: i32) -> Result<(), TransportError> {
        self.record(TransportCall::Volume(volume))
    }

    fn select_audio_track(&self, index: i32) -> Result<(), TransportError> {
        self.record(TransportCall::SelectTrack(index))
    }
}

/// Content center where every song has a lyric and preloads succeed unless
/// told otherwise
#[derive(Default)]
pub struct MockContent {
    missing_lyrics: Mutex<HashSet<String>>,
    failing_preloads: Mutex<HashSet<String>>,
    cached: Mutex<HashSet<String>>,
    lyric_calls: AtomicUsize,
    preload_calls: AtomicUsize,
}

impl MockContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lyric_calls(&self) -> usize {
        self.lyric_calls.load(Ordering::SeqCst)
    }

    pub fn preload_calls(&self) -> usize {
        self.preload_calls.load(Ordering::SeqCst)
    }

    pub fn remove_lyric(&self, song_code: &str) {
        self.missing_lyrics.lock().insert(song_code.to_string());
    }

    pub fn fail_preload(&self, song_code: &str) {
        self.failing_preloads.lock().insert(song_code.to_string());
    }

    pub fn allow_preload(&self, song_code: &str) {
        self.failing_preloads.lock().remove(song_code);
    }

    pub fn mark_cached(&self, song_code: &str) {
        self.cached.lock().insert(song_code.to_string());
    }
}

#[async_trait]
impl ContentCenter for MockContent {
    async fn resolve_lyric(&self, song_code: &str) -> Result<String, ContentError> {
        self.lyric_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.missing_lyrics.lock().contains(song_code) {
            return Err(ContentError::NoLyric(song_code.to_string()));
        }
        Ok(format!("https://lyrics.test/{}.xml", song_code))
    }

    async fn preload_asset(&self, song_code: &str) -> Result<(), ContentError> {
        self.preload_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.failing_preloads.lock().contains(song_code) {
            return Err(ContentError::Preload {
                song: song_code.to_string(),
                reason: "disk full".into(),
            });
        }
        self.cached.lock().insert(song_code.to_string());
        Ok(())
    }

    fn is_asset_cached(&self, song_code: &str) -> bool {
        self.cached.lock().contains(song_code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCall {
    Open(String, i64),
    Play,
    Pause,
    Resume,
    Stop,
    Seek(i64),
}

#[derive(Default)]
struct PlayerInner {
    state: PlayerState,
    position_ms: i64,
    duration_ms: i64,
    calls: Vec<PlayerCall>,
}

/// Player that moves between states synchronously as it is driven
#[derive(Default)]
pub struct MockPlayer {
    inner: Mutex<PlayerInner>,
}

impl MockPlayer {
    pub fn new() -> Self {
        let player = Self::default();
        player.inner.lock().duration_ms = 200_000;
        player
    }

    pub fn calls(&self) -> Vec<PlayerCall> {
        self.inner.lock().calls.clone()
    }

    pub fn seeks(&self) -> Vec<i64> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                PlayerCall::Seek(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    pub fn set_state(&self, state: PlayerState) {
        self.inner.lock().state = state;
    }

    pub fn set_position(&self, position_ms: i64) {
        self.inner.lock().position_ms = position_ms;
    }

    fn apply(&self, call: PlayerCall, state: Option<PlayerState>) {
        let mut inner = self.inner.lock();
        if let Some(state) = state {
            inner.state = state;
        }
        inner.calls.push(call);
    }
}

impl MediaPlayer for MockPlayer {
    fn open(&self, song_code: &str, start_position_ms: i64) {
        self.inner.lock().position_ms = start_position_ms;
        self.apply(PlayerCall::Open(song_code.to_string(), start_position_ms), Some(PlayerState::Opening));
    }

    fn play(&self) {
        self.apply(PlayerCall::Play, Some(PlayerState::Playing));
    }

    fn pause(&self) {
        self.apply(PlayerCall::Pause, Some(PlayerState::Paused));
    }

    fn resume(&self) {
        self.apply(PlayerCall::Resume, Some(PlayerState::Playing));
    }

    fn stop(&self) {
        self.apply(PlayerCall::Stop, Some(PlayerState::Stopped));
    }

    fn seek(&self, position_ms: i64) {
        self.inner.lock().position_ms = position_ms;
        self.apply(PlayerCall::Seek(position_ms), None);
    }

    fn position_ms(&self) -> i64 {
        self.inner.lock().position_ms
    }

    fn duration_ms(&self) -> i64 {
        self.inner.lock().duration_ms
    }

    fn state(&self) -> PlayerState {
        self.inner.lock().state
    }
}

/// An engine wired to mocks, for channel "room" and uid [`LOCAL_UID`]
pub struct Harness {
    pub engine: KtvEngine,
    pub transport: Arc<MockTransport>,
    pub content: Arc<MockContent>,
    pub player: Arc<MockPlayer>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(KtvConfig::new("room", LOCAL_UID))
    }

    pub fn with_config(config: KtvConfig) -> Self {
        let transport = Arc::new(MockTransport::new());
        let content = Arc::new(MockContent::new());
        let player = Arc::new(MockPlayer::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let collaborators =
            Collaborators::new(transport.clone(), content.clone(), player.clone()).with_clock(clock.clone());
        let engine = KtvEngine::new(config, collaborators).expect("valid test config");
        Self {
            engine,
            transport,
            content,
            player,
            clock,
        }
    }
}
