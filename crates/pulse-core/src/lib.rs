//! Core abstractions for the Pulse remote API client.
//!
//! This crate provides the fundamental building blocks:
//! - Build, stage and agent records as reported by the server
//! - `ClientError` / `GatewayError` - the typed error taxonomy
//! - `ClientConfig` / `PollConfig` - tunable policy
//! - `Gateway` and `Sleeper` traits

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{ClientConfig, Credentials, PollConfig, duration_millis};
pub use error::{ClientError, GatewayError};
pub use traits::{Gateway, Sleeper, TokioSleeper};
pub use types::{Agent, BuildRequestStatus, BuildResult, BuildStatus, Stage, TriggerOptions};
