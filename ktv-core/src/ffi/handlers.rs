//! Engine event forwarding to the foreign callback

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::session::KtvEvent;

use super::types::KtvEventCallback;

pub(crate) type SharedCallback = Arc<RwLock<Option<Arc<dyn KtvEventCallback>>>>;

/// Forward engine events to whichever callback is installed, until the
/// engine goes away
pub(crate) async fn forward_events(mut events: broadcast::Receiver<KtvEvent>, callback: SharedCallback) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let cb = callback.read().clone();
                if let Some(cb) = cb {
                    dispatch_event(cb.as_ref(), event);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event forwarder lagging, {} events dropped", skipped);
            }
            Err(RecvError::Closed) => {
                debug!("Event channel closed");
                break;
            }
        }
    }
}

/// Hand one event to the callback
pub(crate) fn dispatch_event(cb: &dyn KtvEventCallback, event: KtvEvent) {
    match event {
        KtvEvent::LoadSuccess { song_code, lyric_url } => cb.on_load_success(song_code, lyric_url),
        KtvEvent::LoadFailure { song_code, reason } => cb.on_load_failure(song_code, reason.into()),
        KtvEvent::PlayerStateChanged { state, is_local } => cb.on_player_state_changed(state.into(), is_local),
        KtvEvent::RoleChanged { old, new } => cb.on_role_changed(old.into(), new.into()),
        KtvEvent::PreludeEndReached => cb.on_prelude_end_reached(),
        KtvEvent::SongEndReached => cb.on_song_end_reached(),
        KtvEvent::ScoreUpdated {
            line_score,
            cumulative_score,
        } => cb.on_score_updated(line_score, cumulative_score),
        KtvEvent::PositionUpdated { position_ms, pitch } => cb.on_position_updated(position_ms, pitch),
    }
}
