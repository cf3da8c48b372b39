//! Collaborator boundaries
//!
//! The real-time transport, the song content center and the local media
//! player live outside this crate. The engine only talks to them through
//! the traits defined here.

mod content;
mod player;
mod transport;

pub use content::*;
pub use player::*;
pub use transport::*;
