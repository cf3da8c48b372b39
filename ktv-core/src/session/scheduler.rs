//! Periodic position tick
//!
//! One background task per engine ticks at the configured cadence. Each tick
//! works out the current song position, publishes it, and for main singers
//! broadcasts it to everyone else and checks the lyric boundaries.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::role::Role;
use crate::sync::{broadcast_position, LrcTimeTick, SyncMessage};

use super::engine::{EngineInner, SessionState};
use super::events::KtvEvent;

impl EngineInner {
    /// Start (or restart) the tick loop
    pub(super) fn start_ticker(self: &Arc<Self>) {
        self.stop_ticker();

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        *self.ticker_cancel.lock() = Some(cancel_tx);

        let weak = Arc::downgrade(self);
        let period = self.config.tick_interval();

        tokio::spawn(async move {
            debug!("Scheduler started ({:?} period)", period);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        debug!("Scheduler cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.tick();
                    }
                }
            }
        });
    }

    pub(super) fn stop_ticker(&self) {
        if let Some(cancel) = self.ticker_cancel.lock().take() {
            let _ = cancel.send(());
        }
    }

    /// One scheduler step
    pub(super) fn tick(&self) {
        let now = self.clock.now_ms();
        let role = self.roles.role();
        let mut events = Vec::with_capacity(3);

        let outgoing = {
            let mut pb = self.playback.lock();
            if pb.song.is_none() {
                return;
            }

            let position_ms = if role == Role::Audience {
                // A silent main singer freezes the lyric instead of running on
                match pb.remote.as_ref() {
                    Some(remote) if !remote.is_stale(now, self.config.staleness_window_ms) => {
                        remote.virtual_position_ms(now)
                    }
                    _ => return,
                }
            } else {
                if pb.session_state != SessionState::Playing {
                    return;
                }
                pb.anchor.position_at(now)
            };

            events.push(KtvEvent::PositionUpdated {
                position_ms,
                pitch: pb.pitch,
            });

            if role.is_main_singer() {
                let (prelude_end, song_end) = pb.boundaries.check(position_ms, self.config.prelude_lead_ms);
                if prelude_end {
                    events.push(KtvEvent::PreludeEndReached);
                }
                if song_end {
                    events.push(KtvEvent::SongEndReached);
                }
                broadcast_position(position_ms, pb.playout_delay_ms).map(|position| (position, pb.pitch, pb.local_state))
            } else {
                None
            }
        };

        if let Some((position_ms, pitch, player_state)) = outgoing {
            self.send(&SyncMessage::LrcTime(LrcTimeTick {
                position_ms,
                duration_ms: self.player.duration_ms(),
                network_time_ms: self.network_time_ms(),
                pitch,
                player_state,
            }));
        }

        for event in events {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::role::Role;
    use crate::rtc::PlayerState;
    use crate::session::{KtvEvent, SongRequest};
    use crate::testing::{Harness, LEAD_UID};

    #[tokio::test(start_paused = true)]
    async fn test_ticker_runs_until_stopped() {
        let h = Harness::new();
        h.engine.switch_role(Role::SoloSinger, "").await.unwrap();
        h.engine
            .load_song(SongRequest {
                song_code: "S1".into(),
                auto_play: false,
                main_singer_uid: LEAD_UID,
                role: Role::SoloSinger,
            })
            .await
            .unwrap();
        h.engine.start().unwrap();
        h.engine.on_player_state_changed(PlayerState::Playing);
        h.engine.on_player_position_changed(3_000);

        let mut rx = h.engine.subscribe();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut ticks = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, KtvEvent::PositionUpdated { .. }) {
                ticks += 1;
            }
        }
        assert!(ticks >= 3, "only {ticks} ticks in 100ms");

        h.engine.stop().await;
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(rx.try_recv().is_err());
    }
}
