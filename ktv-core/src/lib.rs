//! KTV Core Library
//!
//! Keeps karaoke playback in step across one room: a solo or lead singer
//! whose player is authoritative, co-singers who follow it in a chorus
//! channel with drift correction, and an audience that scrolls lyrics from
//! the singer's broadcasts.

pub mod config;
pub mod ffi;
pub mod loader;
pub mod role;
pub mod rtc;
pub mod session;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use config::KtvConfig;
pub use role::{Role, SwitchRoleError};
pub use session::{Collaborators, KtvEngine, KtvEvent, SongRequest};
pub use sync::SyncMessage;

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
