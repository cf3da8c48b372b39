//! Role state machine
//!
//! Owns the current role and the chorus channel membership and runs the side
//! effects of each transition against the transport and the player. Switches
//! are serialized: a request made while another one is running is refused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::KtvConfig;
use crate::loader::ResourceLoader;
use crate::rtc::{log_failure, AudioScenario, ChannelOptions, MediaPlayer, PlayerState, RtcTransport};

use super::{Role, Transition};

/// Why a role switch did not happen. The role and membership are unchanged
/// whenever one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SwitchRoleError {
    #[error("Switching from {from:?} to {to:?} is not permitted")]
    NoPermission { from: Role, to: Role },

    #[error("Joining the chorus channel failed")]
    JoinChannelFailed,

    #[error("Preloading the song asset failed")]
    AssetPreloadFailed,

    #[error("Preloading the song asset and joining the chorus channel both failed")]
    PreloadAndJoinFailed,

    #[error("Another role switch is in progress")]
    TransitionInProgress,
}

/// The chorus channel connection held by lead and co-singers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMembership {
    pub channel_id: String,
    pub joined_as: Role,
    pub options: ChannelOptions,
}

/// Song a chorus join is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongContext {
    pub song_code: String,
    /// Uid whose main-channel audio a co-singer mutes while in chorus
    pub main_singer_uid: u32,
}

#[derive(Debug, Default)]
struct RoleState {
    role: Role,
    membership: Option<ChannelMembership>,
    muted_lead_uid: Option<u32>,
}

/// Clears the switching flag when the switch ends, however it ends
struct SwitchGuard<'a>(&'a AtomicBool);

impl<'a> SwitchGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RoleMachine {
    config: Arc<KtvConfig>,
    transport: Arc<dyn RtcTransport>,
    player: Arc<dyn MediaPlayer>,
    loader: ResourceLoader,
    state: Mutex<RoleState>,
    switching: AtomicBool,
}

impl RoleMachine {
    pub fn new(
        config: Arc<KtvConfig>,
        transport: Arc<dyn RtcTransport>,
        player: Arc<dyn MediaPlayer>,
        loader: ResourceLoader,
    ) -> Self {
        Self {
            config,
            transport,
            player,
            loader,
            state: Mutex::new(RoleState::default()),
            switching: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    pub fn membership(&self) -> Option<ChannelMembership> {
        self.state.lock().membership.clone()
    }

    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::Acquire)
    }

    /// Whether captured microphone frames should go to the chorus channel
    pub fn publishes_direct_audio(&self) -> bool {
        self.state
            .lock()
            .membership
            .as_ref()
            .is_some_and(|m| m.options.publish_direct_custom_audio)
    }

    /// Switch to `target`, running the transition's side effects.
    ///
    /// `song` is the currently loaded song; chorus joins preload its asset
    /// in parallel with the channel join.
    pub async fn switch_role(
        &self,
        target: Role,
        token: &str,
        song: Option<&SongContext>,
    ) -> Result<Transition, SwitchRoleError> {
        let _guard = SwitchGuard::acquire(&self.switching).ok_or(SwitchRoleError::TransitionInProgress)?;

        let from = self.role();
        let transition = Transition::plan(from, target).ok_or(SwitchRoleError::NoPermission { from, to: target })?;
        info!("Switching role {:?} -> {:?}", from, target);

        let (membership, muted_lead_uid) = match transition {
            Transition::PublishSolo => {
                self.publish_on_main();
                (None, None)
            }
            Transition::PublishAndJoinChorus => {
                self.publish_on_main();
                match self.join_chorus(Role::LeadSinger, token, song).await {
                    Ok(membership) => (Some(membership), None),
                    Err(e) => {
                        self.unpublish_on_main();
                        return Err(e);
                    }
                }
            }
            Transition::JoinChorusAsLead => (Some(self.join_chorus(Role::LeadSinger, token, song).await?), None),
            Transition::JoinChorusAsCoSinger => {
                log_failure(
                    "update_channel_options",
                    self.transport.update_channel_options(&ChannelOptions::main_subscribe_only()),
                );
                let membership = self.join_chorus(Role::CoSinger, token, song).await?;
                (Some(membership), song.map(|s| self.follow_song(s)))
            }
            Transition::StopSolo => {
                self.stop_player();
                self.unpublish_on_main();
                (None, None)
            }
            Transition::LeaveChorusAsLead => {
                self.leave_chorus_as_lead().await;
                (None, None)
            }
            Transition::StopLead => {
                self.stop_player();
                self.unpublish_on_main();
                self.leave_chorus_as_lead().await;
                (None, None)
            }
            Transition::LeaveChorusAsCoSinger => {
                self.leave_chorus_as_co_singer().await;
                (None, None)
            }
        };

        {
            let mut state = self.state.lock();
            state.role = target;
            state.membership = membership;
            state.muted_lead_uid = muted_lead_uid;
        }

        info!("Role is now {:?}", target);
        Ok(transition)
    }

    /// Join the chorus channel and preload the song asset side by side, then
    /// classify once both have finished. A failed attempt leaves nothing
    /// joined.
    async fn join_chorus(
        &self,
        role: Role,
        token: &str,
        song: Option<&SongContext>,
    ) -> Result<ChannelMembership, SwitchRoleError> {
        let channel_id = self.config.chorus_channel_id();
        let options = ChannelOptions::chorus(role);
        log_failure("set_audio_scenario", self.transport.set_audio_scenario(AudioScenario::Chorus));

        let preload = async {
            match song {
                Some(song) => self.loader.ensure_asset(&song.song_code).await.is_ok(),
                None => {
                    warn!("No song loaded, nothing to preload for the chorus");
                    false
                }
            }
        };
        let (joined, preloaded) = tokio::join!(
            self.transport.join_secondary_channel(&channel_id, token, &options),
            preload
        );

        if let Err(e) = &joined {
            warn!("Joining chorus channel {} failed: {}", channel_id, e);
        }
        let failure = match (joined.is_ok(), preloaded) {
            (true, true) => None,
            (false, true) => Some(SwitchRoleError::JoinChannelFailed),
            (true, false) => Some(SwitchRoleError::AssetPreloadFailed),
            (false, false) => Some(SwitchRoleError::PreloadAndJoinFailed),
        };

        if let Some(err) = failure {
            if joined.is_ok() {
                self.leave_secondary().await;
            }
            log_failure(
                "set_audio_scenario",
                self.transport.set_audio_scenario(AudioScenario::GameStreaming),
            );
            return Err(err);
        }

        info!("Joined chorus channel {} as {:?}", channel_id, role);
        Ok(ChannelMembership {
            channel_id,
            joined_as: role,
            options,
        })
    }

    async fn leave_chorus_as_lead(&self) {
        let options = ChannelOptions {
            publish_direct_custom_audio: false,
            ..ChannelOptions::chorus(Role::LeadSinger)
        };
        log_failure(
            "update_secondary_channel_options",
            self.transport.update_secondary_channel_options(&options),
        );
        self.leave_secondary().await;
        log_failure(
            "set_audio_scenario",
            self.transport.set_audio_scenario(AudioScenario::GameStreaming),
        );
    }

    async fn leave_chorus_as_co_singer(&self) {
        self.player.stop();
        log_failure(
            "update_channel_options",
            self.transport.update_channel_options(&ChannelOptions::main_subscribe_only()),
        );
        self.leave_secondary().await;

        let muted = self.state.lock().muted_lead_uid.take();
        if let Some(uid) = muted {
            log_failure("mute_remote_audio", self.transport.mute_remote_audio(uid, false));
        }
        log_failure(
            "set_audio_scenario",
            self.transport.set_audio_scenario(AudioScenario::GameStreaming),
        );
    }

    /// Leave the chorus channel; a failure here means there is nothing left
    /// to leave
    async fn leave_secondary(&self) {
        if let Err(e) = self.transport.leave_secondary_channel().await {
            debug!("Leaving chorus channel: {} (treating as already left)", e);
        }
    }

    fn publish_on_main(&self) {
        let recording = self.config.recording;
        log_failure(
            "update_channel_options",
            self.transport.update_channel_options(&ChannelOptions::main_publishing()),
        );
        log_failure(
            "set_direct_external_audio_source",
            self.transport.set_direct_external_audio_source(true),
        );
        log_failure(
            "set_recorded_audio_frame_parameters",
            self.transport.set_recorded_audio_frame_parameters(
                recording.sample_rate,
                recording.channels,
                recording.samples_per_call,
            ),
        );
    }

    fn unpublish_on_main(&self) {
        log_failure(
            "update_channel_options",
            self.transport.update_channel_options(&ChannelOptions::main_subscribe_only()),
        );
        log_failure(
            "set_direct_external_audio_source",
            self.transport.set_direct_external_audio_source(false),
        );
    }

    fn stop_player(&self) {
        if self.player.state() != PlayerState::Stopped {
            self.player.stop();
        }
    }

    /// Open the song locally and silence the lead's main-channel stream,
    /// which the co-singer now hears through the chorus channel
    fn follow_song(&self, song: &SongContext) -> u32 {
        self.player.open(&song.song_code, 0);
        log_failure(
            "mute_remote_audio",
            self.transport.mute_remote_audio(song.main_singer_uid, true),
        );
        song.main_singer_uid
    }

    #[cfg(test)]
    pub(crate) fn force_role(&self, role: Role, membership: Option<ChannelMembership>) {
        let mut state = self.state.lock();
        state.role = role;
        state.membership = membership;
    }
}
