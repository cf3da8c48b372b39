//! Playback session: the engine façade, its events and its scheduler

mod engine;
mod events;
mod scheduler;
mod song;

pub use engine::*;
pub use events::*;
pub use song::*;
