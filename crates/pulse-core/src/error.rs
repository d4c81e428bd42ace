//! Error taxonomy.

use std::{num::ParseIntError, time::Duration};

use thiserror::Error;

use crate::types::BuildStatus;

/// Failure of a single remote call, as seen at the gateway boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The call never got an answer (connection, I/O).
    #[error("transport failure: {0}")]
    Transport(String),
    /// The server answered with a fault.
    #[error("server fault {code}: {message}")]
    Fault { code: i32, message: String },
    /// The server answered with something that does not fit the expected shape.
    #[error("malformed reply: {0}")]
    Decode(String),
    /// No answer within the client-side call timeout.
    #[error("no reply within {0:?}")]
    TimedOut(Duration),
    /// The gateway has already been released.
    #[error("gateway closed")]
    Closed,
}

/// Client error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    Auth(#[source] GatewayError),
    #[error("remote call {method} failed: {source}")]
    Transport {
        method: &'static str,
        #[source]
        source: GatewayError,
    },
    #[error("build ID request timed out: server still reports {status} after {waited:?}")]
    Timeout { status: BuildStatus, waited: Duration },
    #[error("server sent malformed build ID {id:?}: {source}")]
    Parse {
        id: String,
        #[source]
        source: ParseIntError,
    },
    #[error("no latest build for project {project}")]
    NotFound { project: String },
    #[error("stage list is empty for project {project}")]
    Empty { project: String },
    #[error("session is closed")]
    SessionClosed,
    #[error("build watch aborted: {0}")]
    Aborted(String),
}

impl ClientError {
    /// Wrap a gateway failure for the given remote method.
    #[must_use]
    pub const fn transport(method: &'static str, source: GatewayError) -> Self {
        Self::Transport { method, source }
    }

    /// Whether this error came from a remote call that could succeed if repeated.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Whether the server itself rejected the call.
    #[must_use]
    pub const fn is_server_fault(&self) -> bool {
        matches!(
            self,
            Self::Auth(GatewayError::Fault { .. })
                | Self::Transport {
                    source: GatewayError::Fault { .. },
                    ..
                }
        )
    }
}
