//! Session-scoped client for the Pulse remote API.
//!
//! Provides:
//! - `Session` - Authenticated token holder over a `Gateway`
//! - `PulseClient` - Remote operations and aggregate queries
//! - `BuildWatch` - Background build completion poller

pub mod client;
pub mod session;
pub mod watch;

#[cfg(test)]
mod testing;

pub use client::PulseClient;
pub use session::Session;
pub use watch::{BuildWatch, WatchOutcome, WatchState};
