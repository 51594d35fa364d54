//! Work items and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// One row of the request queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier, assigned at insertion.
    pub id: WorkId,

    /// Opaque identifier of the requester/tenant.
    pub owner_key: String,

    /// Input to the side effects. Never modified after insertion.
    pub topic: String,

    /// Current lifecycle status.
    pub status: Status,

    /// Number of successful claims. Greater than one only under lease reclaim.
    pub attempts: u32,

    /// Identity of the current (or last) owning worker. Kept after the
    /// terminal transition as an audit trail.
    pub locked_by: Option<String>,

    pub created_at: DateTime<Utc>,
    /// Set by the first claim only.
    pub started_at: Option<DateTime<Utc>>,
    /// Updated on every claim.
    pub locked_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Set if and only if `status` is terminal.
    pub finished_at: Option<DateTime<Utc>>,

    /// Error text recorded with the `failed` transition.
    pub last_error: Option<String>,
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(WorkId)
            .map_err(|e| Error::Other(format!("invalid work id {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a work item.
///
/// `queued -> processing -> {succeeded, failed}`; nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Waiting for a worker.
    Queued,
    /// Claimed by exactly one worker.
    Processing,
    /// Side effects done. Terminal.
    Succeeded,
    /// Side effects failed for this item. Terminal.
    Failed,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Queued, Processing) | (Processing, Succeeded) | (Processing, Failed)
        )
    }

    /// Checked transition, for stores that apply the state machine in code.
    pub fn transition(self, to: Status) -> Result<Status> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Processing => "processing",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Status::Queued),
            "processing" => Ok(Status::Processing),
            "succeeded" => Ok(Status::Succeeded),
            "failed" => Ok(Status::Failed),
            other => Err(Error::Other(format!("unknown status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

/// What a successful claim hands to the worker: identity plus payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedItem {
    pub id: WorkId,
    pub owner_key: String,
    pub topic: String,
    pub claimed_by: String,
    /// 1 on the first claim, higher when reclaimed after lease expiry.
    pub attempt: u32,
    pub locked_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// A request to enqueue. Producers build these; the store assigns identity.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub(crate) owner_key: String,
    pub(crate) topic: String,
}

impl NewWorkItem {
    pub fn new(owner_key: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            owner_key: owner_key.into(),
            topic: topic.into(),
        }
    }

    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
