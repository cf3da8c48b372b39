//! Sync Engine
//!
//! Side-channel messages between singers and the clock math that turns them
//! into a shared song position.

mod clock;
mod protocol;
mod state;

pub use clock::*;
pub use protocol::*;
pub use state::*;
