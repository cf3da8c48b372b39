//! FFI bindings for native UI integration
//!
//! This module provides the interface exposed via uniffi to Swift/Kotlin.
//! The host app implements the engine, content center and player callback
//! interfaces and reports their completions back through `KtvSession`.

mod adapters;
mod handlers;
mod session;
mod types;

pub use session::*;
pub use types::*;
