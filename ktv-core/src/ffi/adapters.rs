//! Adapters from foreign callback interfaces to the engine's collaborator
//! traits
//!
//! Foreign calls that finish later (chorus join, lyric lookup, preload) are
//! matched to their completion through `PendingRequests`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::rtc::{
    AudioFrame, AudioScenario, ChannelOptions, ContentCenter, ContentError, MediaPlayer, PlayerState, RtcTransport,
    TransportError,
};

use super::types::{AudioFrameData, ChannelMediaOptions, ForeignContentCenter, ForeignMediaPlayer, ForeignRtcEngine};

enum Slot<T> {
    Waiting(Vec<oneshot::Sender<T>>),
    /// Completion that arrived before anyone waited for it
    Done(T),
}

/// Completions keyed by request id
pub(crate) struct PendingRequests<T> {
    slots: Mutex<HashMap<String, Slot<T>>>,
}

impl<T: Clone> PendingRequests<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for the completion of `key`
    pub(crate) fn register(&self, key: &str) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock();
        match slots.remove(key) {
            Some(Slot::Done(value)) => {
                let _ = tx.send(value);
            }
            Some(Slot::Waiting(mut waiters)) => {
                waiters.push(tx);
                slots.insert(key.to_string(), Slot::Waiting(waiters));
            }
            None => {
                slots.insert(key.to_string(), Slot::Waiting(vec![tx]));
            }
        }
        rx
    }

    pub(crate) fn complete(&self, key: &str, value: T) {
        let mut slots = self.slots.lock();
        match slots.remove(key) {
            Some(Slot::Waiting(waiters)) => {
                for waiter in waiters {
                    let _ = waiter.send(value.clone());
                }
            }
            Some(Slot::Done(_)) | None => {
                slots.insert(key.to_string(), Slot::Done(value));
            }
        }
    }

    /// Stop waiting for `key`; any receivers see the request dropped
    pub(crate) fn cancel(&self, key: &str) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(key), Some(Slot::Waiting(_))) {
            slots.remove(key);
        }
    }

    /// Drop a completion nobody waited for
    pub(crate) fn clear_stale(&self, key: &str) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(key), Some(Slot::Done(_))) {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    fn is_waiting(&self, key: &str) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Waiting(_)))
    }
}

pub(crate) struct RtcAdapter {
    engine: Arc<dyn ForeignRtcEngine>,
    local_uid: u32,
    join_timeout: Duration,
    joins: PendingRequests<i32>,
}

impl RtcAdapter {
    pub(crate) fn new(engine: Arc<dyn ForeignRtcEngine>, local_uid: u32, join_timeout: Duration) -> Self {
        Self {
            engine,
            local_uid,
            join_timeout,
            joins: PendingRequests::new(),
        }
    }

    /// Join result for `channel_id`, 0 on success
    pub(crate) fn complete_join(&self, channel_id: &str, code: i32) {
        debug!("Chorus join result for {}: {}", channel_id, code);
        self.joins.complete(channel_id, code);
    }
}

#[async_trait]
impl RtcTransport for RtcAdapter {
    async fn join_secondary_channel(
        &self,
        channel_id: &str,
        token: &str,
        options: &ChannelOptions,
    ) -> Result<(), TransportError> {
        self.joins.clear_stale(channel_id);
        let result = self.joins.register(channel_id);

        let code = self.engine.join_secondary_channel(
            channel_id.to_string(),
            token.to_string(),
            self.local_uid,
            ChannelMediaOptions::from(options),
        );
        if code != 0 {
            self.joins.cancel(channel_id);
            return Err(TransportError::JoinFailed(code));
        }

        match tokio::time::timeout(self.join_timeout, result).await {
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(code)) => Err(TransportError::JoinFailed(code)),
            Ok(Err(_)) => Err(TransportError::Dropped),
            Err(_) => {
                warn!("No join result for {} after {:?}", channel_id, self.join_timeout);
                self.joins.cancel(channel_id);
                Err(TransportError::JoinTimeout)
            }
        }
    }

    async fn leave_secondary_channel(&self) -> Result<(), TransportError> {
        TransportError::check(self.engine.leave_secondary_channel())
    }

    fn update_channel_options(&self, options: &ChannelOptions) -> Result<(), TransportError> {
        TransportError::check(self.engine.update_channel_options(options.into()))
    }

    fn update_secondary_channel_options(&self, options: &ChannelOptions) -> Result<(), TransportError> {
        TransportError::check(self.engine.update_secondary_channel_options(options.into()))
    }

    fn send_side_channel_message(&self, payload: &[u8]) -> Result<(), TransportError> {
        TransportError::check(self.engine.send_stream_message(payload.to_vec()))
    }

    fn current_network_time_ms(&self) -> i64 {
        self.engine.ntp_time_ms()
    }

    fn set_recorded_audio_frame_parameters(
        &self,
        sample_rate: u32,
        channels: u32,
        samples_per_call: u32,
    ) -> Result<(), TransportError> {
        TransportError::check(
            self.engine
                .set_recording_audio_frame_parameters(sample_rate, channels, samples_per_call),
        )
    }

    fn set_direct_external_audio_source(&self, enabled: bool) -> Result<(), TransportError> {
        TransportError::check(self.engine.enable_direct_external_audio_source(enabled))
    }

    fn push_direct_audio_frame(&self, frame: &AudioFrame) -> Result<(), TransportError> {
        TransportError::check(self.engine.push_direct_audio_frame(AudioFrameData::from(frame)))
    }

    fn mute_remote_audio(&self, uid: u32, muted: bool) -> Result<(), TransportError> {
        TransportError::check(self.engine.mute_remote_audio_stream(uid, muted))
    }

    fn set_audio_scenario(&self, scenario: AudioScenario) -> Result<(), TransportError> {
        TransportError::check(self.engine.set_audio_scenario(scenario.into()))
    }

    fn adjust_playback_signal_volume(&self, volume: i32) -> Result<(), TransportError> {
        TransportError::check(self.engine.adjust_playback_signal_volume(volume))
    }

    fn select_audio_track(&self, index: i32) -> Result<(), TransportError> {
        TransportError::check(self.engine.select_audio_track(index))
    }
}

pub(crate) struct ContentAdapter {
    center: Arc<dyn ForeignContentCenter>,
    request_timeout: Duration,
    lyrics: PendingRequests<Option<String>>,
    preloads: PendingRequests<i32>,
}

impl ContentAdapter {
    pub(crate) fn new(center: Arc<dyn ForeignContentCenter>, request_timeout: Duration) -> Self {
        Self {
            center,
            request_timeout,
            lyrics: PendingRequests::new(),
            preloads: PendingRequests::new(),
        }
    }

    pub(crate) fn complete_lyric(&self, request_id: &str, lyric_url: Option<String>) {
        self.lyrics.complete(request_id, lyric_url);
    }

    /// Preload status for `song_code`, 0 once the asset is on disk
    pub(crate) fn complete_preload(&self, song_code: &str, status: i32) {
        self.preloads.complete(song_code, status);
    }
}

#[async_trait]
impl ContentCenter for ContentAdapter {
    async fn resolve_lyric(&self, song_code: &str) -> Result<String, ContentError> {
        let request_id = self.center.get_lyric(song_code.to_string());
        debug!("Lyric request {} for {}", request_id, song_code);

        let result = self.lyrics.register(&request_id);
        match tokio::time::timeout(self.request_timeout, result).await {
            Ok(Ok(Some(url))) => Ok(url),
            Ok(Ok(None)) => Err(ContentError::NoLyric(song_code.to_string())),
            Ok(Err(_)) => Err(ContentError::Dropped),
            Err(_) => {
                warn!("No lyric result for {} after {:?}", song_code, self.request_timeout);
                self.lyrics.cancel(&request_id);
                Err(ContentError::Timeout(song_code.to_string()))
            }
        }
    }

    async fn preload_asset(&self, song_code: &str) -> Result<(), ContentError> {
        self.preloads.clear_stale(song_code);
        let result = self.preloads.register(song_code);

        let code = self.center.preload(song_code.to_string());
        if code != 0 {
            self.preloads.cancel(song_code);
            return Err(ContentError::Preload {
                song: song_code.to_string(),
                reason: format!("could not start (code {})", code),
            });
        }

        match tokio::time::timeout(self.request_timeout, result).await {
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(status)) => Err(ContentError::Preload {
                song: song_code.to_string(),
                reason: format!("status {}", status),
            }),
            Ok(Err(_)) => Err(ContentError::Dropped),
            Err(_) => {
                warn!("No preload result for {} after {:?}", song_code, self.request_timeout);
                self.preloads.cancel(song_code);
                Err(ContentError::Timeout(song_code.to_string()))
            }
        }
    }

    fn is_asset_cached(&self, song_code: &str) -> bool {
        self.center.is_preloaded(song_code.to_string())
    }
}

pub(crate) struct PlayerAdapter {
    player: Arc<dyn ForeignMediaPlayer>,
}

impl PlayerAdapter {
    pub(crate) fn new(player: Arc<dyn ForeignMediaPlayer>) -> Self {
        Self { player }
    }
}

impl MediaPlayer for PlayerAdapter {
    fn open(&self, song_code: &str, start_position_ms: i64) {
        self.player.open(song_code.to_string(), start_position_ms);
    }

    fn play(&self) {
        self.player.play();
    }

    fn pause(&self) {
        self.player.pause();
    }

    fn resume(&self) {
        self.player.resume();
    }

    fn stop(&self) {
        self.player.stop();
    }

    fn seek(&self, position_ms: i64) {
        self.player.seek(position_ms);
    }

    fn position_ms(&self) -> i64 {
        self.player.position_ms()
    }

    fn duration_ms(&self) -> i64 {
        self.player.duration_ms()
    }

    fn state(&self) -> PlayerState {
        self.player.state().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::types::{AudioScenarioKind, MediaPlayerState};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeRtc {
        join_code: i32,
        joins: AtomicUsize,
    }

    impl ForeignRtcEngine for FakeRtc {
        fn join_secondary_channel(&self, _: String, _: String, _: u32, _: ChannelMediaOptions) -> i32 {
            self.joins.fetch_add(1, Ordering::SeqCst);
            self.join_code
        }
        fn leave_secondary_channel(&self) -> i32 {
            -3
        }
        fn update_channel_options(&self, _: ChannelMediaOptions) -> i32 {
            0
        }
        fn update_secondary_channel_options(&self, _: ChannelMediaOptions) -> i32 {
            0
        }
        fn send_stream_message(&self, _: Vec<u8>) -> i32 {
            0
        }
        fn ntp_time_ms(&self) -> i64 {
            0
        }
        fn set_recording_audio_frame_parameters(&self, _: u32, _: u32, _: u32) -> i32 {
            0
        }
        fn enable_direct_external_audio_source(&self, _: bool) -> i32 {
            0
        }
        fn push_direct_audio_frame(&self, _: AudioFrameData) -> i32 {
            0
        }
        fn mute_remote_audio_stream(&self, _: u32, _: bool) -> i32 {
            0
        }
        fn set_audio_scenario(&self, _: AudioScenarioKind) -> i32 {
            0
        }
        fn adjust_playback_signal_volume(&self, _: i32) -> i32 {
            0
        }
        fn select_audio_track(&self, _: i32) -> i32 {
            0
        }
    }

    struct FakeContent;

    impl ForeignContentCenter for FakeContent {
        fn get_lyric(&self, song_code: String) -> String {
            format!("req-{}", song_code)
        }
        fn is_preloaded(&self, _: String) -> bool {
            false
        }
        fn preload(&self, song_code: String) -> i32 {
            if song_code == "broken" {
                -1
            } else {
                0
            }
        }
    }

    struct FakePlayer;

    impl ForeignMediaPlayer for FakePlayer {
        fn open(&self, _: String, _: i64) {}
        fn play(&self) {}
        fn pause(&self) {}
        fn resume(&self) {}
        fn stop(&self) {}
        fn seek(&self, _: i64) {}
        fn position_ms(&self) -> i64 {
            1234
        }
        fn duration_ms(&self) -> i64 {
            0
        }
        fn state(&self) -> MediaPlayerState {
            MediaPlayerState::Paused
        }
    }

    fn rtc(join_code: i32) -> Arc<RtcAdapter> {
        let engine = Arc::new(FakeRtc {
            join_code,
            ..FakeRtc::default()
        });
        Arc::new(RtcAdapter::new(engine, 1001, Duration::from_secs(10)))
    }

    fn content() -> Arc<ContentAdapter> {
        Arc::new(ContentAdapter::new(Arc::new(FakeContent), Duration::from_secs(60)))
    }

    #[test]
    fn test_completion_before_registration_is_kept() {
        let pending = PendingRequests::new();
        pending.complete("a", 7);

        let mut rx = pending.register("a");
        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[test]
    fn test_stale_completion_is_cleared() {
        let pending = PendingRequests::new();
        pending.complete("a", 7);
        pending.clear_stale("a");

        let mut rx = pending.register("a");
        assert!(rx.try_recv().is_err());
        pending.complete("a", 0);
        assert_eq!(rx.try_recv().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_join_waits_for_completion() {
        let adapter = rtc(0);
        let joining = Arc::clone(&adapter);
        let join = tokio::spawn(async move {
            joining
                .join_secondary_channel("room_ex", "t", &ChannelOptions::default())
                .await
        });
        while !adapter.joins.is_waiting("room_ex") {
            tokio::task::yield_now().await;
        }

        adapter.complete_join("room_ex", 0);
        assert_eq!(join.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_join_failure_code_from_callback() {
        let adapter = rtc(0);
        adapter.complete_join("room_ex", 0);
        // That completion was stale; this one belongs to the join below
        let joining = Arc::clone(&adapter);
        let join = tokio::spawn(async move {
            joining
                .join_secondary_channel("room_ex", "t", &ChannelOptions::default())
                .await
        });
        while !adapter.joins.is_waiting("room_ex") {
            tokio::task::yield_now().await;
        }

        adapter.complete_join("room_ex", 17);
        assert_eq!(join.await.unwrap(), Err(TransportError::JoinFailed(17)));
    }

    #[tokio::test]
    async fn test_join_rejected_immediately() {
        let adapter = rtc(-2);
        let result = adapter
            .join_secondary_channel("room_ex", "t", &ChannelOptions::default())
            .await;
        assert_eq!(result, Err(TransportError::JoinFailed(-2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_times_out() {
        let adapter = rtc(0);
        let result = adapter
            .join_secondary_channel("room_ex", "t", &ChannelOptions::default())
            .await;
        assert_eq!(result, Err(TransportError::JoinTimeout));
    }

    #[tokio::test]
    async fn test_leave_failure_code_is_an_error() {
        assert_eq!(rtc(0).leave_secondary_channel().await, Err(TransportError::Call(-3)));
    }

    #[tokio::test]
    async fn test_lyric_lookup_by_request_id() {
        let adapter = content();
        // The host may answer before the adapter starts waiting
        adapter.complete_lyric("req-S1", Some("https://lyrics.test/S1.xml".into()));

        let url = adapter.resolve_lyric("S1").await.unwrap();
        assert_eq!(url, "https://lyrics.test/S1.xml");

        adapter.complete_lyric("req-S2", None);
        assert_eq!(
            adapter.resolve_lyric("S2").await,
            Err(ContentError::NoLyric("S2".into()))
        );
    }

    #[tokio::test]
    async fn test_preload_statuses() {
        let adapter = content();

        let preloading = Arc::clone(&adapter);
        let preload = tokio::spawn(async move { preloading.preload_asset("S1").await });
        while !adapter.preloads.is_waiting("S1") {
            tokio::task::yield_now().await;
        }
        adapter.complete_preload("S1", 0);
        assert_eq!(preload.await.unwrap(), Ok(()));

        assert!(matches!(
            adapter.preload_asset("broken").await,
            Err(ContentError::Preload { .. })
        ));
        assert!(!adapter.preloads.is_waiting("broken"));
    }

    #[tokio::test]
    async fn test_rejected_join_leaves_nothing_waiting() {
        let adapter = rtc(-2);
        let _ = adapter
            .join_secondary_channel("room_ex", "t", &ChannelOptions::default())
            .await;
        assert!(!adapter.joins.is_waiting("room_ex"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_preload_result_times_out() {
        let adapter = content();

        assert_eq!(
            adapter.preload_asset("S1").await,
            Err(ContentError::Timeout("S1".into()))
        );
        assert!(!adapter.preloads.is_waiting("S1"));

        // A late answer is kept as stale and cleared by the next attempt
        adapter.complete_preload("S1", 0);
        let preloading = Arc::clone(&adapter);
        let retry = tokio::spawn(async move { preloading.preload_asset("S1").await });
        while !adapter.preloads.is_waiting("S1") {
            tokio::task::yield_now().await;
        }
        adapter.complete_preload("S1", 0);
        assert_eq!(retry.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_lyric_result_times_out() {
        let adapter = content();

        assert_eq!(
            adapter.resolve_lyric("S1").await,
            Err(ContentError::Timeout("S1".into()))
        );
        assert!(!adapter.lyrics.is_waiting("req-S1"));
    }

    #[test]
    fn test_player_adapter_maps_state() {
        let player = PlayerAdapter::new(Arc::new(FakePlayer));
        assert_eq!(player.state(), PlayerState::Paused);
        assert_eq!(player.position_ms(), 1234);
    }
}
