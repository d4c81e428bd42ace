//! Records exchanged with the Pulse remote API.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a build request on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    /// Request received but not yet looked at by the scheduler.
    Unhandled,
    /// Request accepted and waiting for a free slot.
    Queued,
    /// Request turned into a build with an assigned number.
    Activated,
    /// The build is executing.
    Running,
    /// Request merged into another pending request.
    Assimilated,
    /// Request refused by the server.
    Rejected,
    /// Request cancelled before activation.
    Cancelled,
    /// Any status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl BuildStatus {
    /// Whether the request is still waiting for activation.
    ///
    /// Pending requests never carry a usable build number.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Unhandled | Self::Queued)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unhandled => "UNHANDLED",
            Self::Queued => "QUEUED",
            Self::Activated => "ACTIVATED",
            Self::Running => "RUNNING",
            Self::Assimilated => "ASSIMILATED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Snapshot of a build request as returned by the activation wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequestStatus {
    /// Build number, transmitted as text. Empty until assigned.
    #[serde(rename = "buildId", default)]
    pub id: String,
    /// Request status.
    pub status: BuildStatus,
}

/// One named phase of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    #[serde(default)]
    pub complete: bool,
    /// Agent the stage was dispatched to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl Stage {
    #[must_use]
    pub fn new(name: impl Into<String>, complete: bool) -> Self {
        Self {
            name: name.into(),
            complete,
            agent: None,
        }
    }
}

/// Server-side record of one build attempt for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub id: i64,
    /// Build-level flag as reported. Not trusted for completion checks.
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl BuildResult {
    /// A build is complete iff every one of its stages is complete.
    ///
    /// The server does not guarantee a build-level roll-up, so the stage
    /// list is authoritative. A build without stages is complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|s| s.complete)
    }

    /// Stage names in server order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }
}

/// A build agent, assembled from the name listing and a detail fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Remaining fields reported by the server.
    #[serde(flatten)]
    pub details: BTreeMap<String, Value>,
}

/// Options for a build trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerOptions {
    /// Rebuild dependencies as well.
    pub rebuild: bool,
    /// Trigger even when nothing changed.
    #[serde(default)]
    pub force: bool,
    /// Pin the build to a revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self {
            rebuild: true,
            force: false,
            revision: None,
        }
    }
}

impl TriggerOptions {
    /// Pin the build to a revision.
    #[must_use]
    pub fn at_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Force the trigger.
    #[must_use]
    pub const fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}
