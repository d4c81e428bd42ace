//! Client configuration.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Default number of consecutive poll failures tolerated.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Default delay between two polls of the same build.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default budget the server may block while waiting for build activation.
pub const DEFAULT_ACTIVATION_WAIT: Duration = Duration::from_secs(15);

/// Whole milliseconds, as the server expects waits. Saturates at `u64::MAX`.
#[must_use]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Policy for the build completion poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Poll failures tolerated before giving up. Never replenished.
    pub retry_budget: u32,
    /// Fixed delay between polls, no backoff.
    pub poll_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollConfig {
    #[must_use]
    pub const fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Configuration for a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// How long the server may block in the activation wait.
    pub activation_wait: Duration,
    /// Client-side bound on each remote call, if any.
    #[serde(default)]
    pub call_timeout: Option<Duration>,
    /// Completion poller policy.
    #[serde(default)]
    pub poll: PollConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            activation_wait: DEFAULT_ACTIVATION_WAIT,
            call_timeout: None,
            poll: PollConfig::default(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub const fn with_activation_wait(mut self, activation_wait: Duration) -> Self {
        self.activation_wait = activation_wait;
        self
    }

    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = Some(call_timeout);
        self
    }

    #[must_use]
    pub const fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }
}

/// Login credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}
