//! Transport layer for the Pulse remote API.
//!
//! Provides:
//! - Remote method catalogue and positional argument builders
//! - In-process gateway emulating the server (feature: memory)

pub mod methods;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryGateway;
pub use methods::{RemoteCall, RemoteMethod};
