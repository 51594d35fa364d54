//! Generated idea types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::work::WorkId;

/// Every successful generation produces exactly this many ideas.
pub const IDEAS_PER_REQUEST: usize = 10;

/// One idea as returned by the generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedIdea {
    pub title: String,
    pub hook: String,
    pub script: String,
    pub cta: String,
}

/// A persisted idea, keyed by (request id, index within the batch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaOutput {
    pub request_id: WorkId,
    pub idx: u32,
    pub idea: GeneratedIdea,
    pub created_at: DateTime<Utc>,
}
