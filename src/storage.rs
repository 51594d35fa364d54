//! The queue store boundary.
//!
//! Every mutation of `status`, `locked_by` and the timestamp columns goes
//! through one of the conditional operations below. Implementations must make
//! each call a single indivisible step against shared state: two concurrent
//! `claim_next` calls never both return the same item.
//!
//! [`crate::db::Db`] is the Postgres implementation; [`memory::MemoryStore`]
//! keeps the same contract in-process.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ClaimedItem, GeneratedIdea, IdeaOutput, NewWorkItem, Status, WorkId, WorkItem};

pub use memory::MemoryStore;

/// Time-bounded ownership. When a lease lapses, another worker may reclaim
/// the item (still `processing`, new owner) until `max_attempts` claims
/// have been spent; after that the item is failed by [`QueueStore::expire_exhausted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    pub duration: Duration,
    pub max_attempts: u32,
}

impl LeasePolicy {
    pub fn new(duration: Duration, max_attempts: u32) -> Self {
        Self {
            duration,
            max_attempts: max_attempts.max(1),
        }
    }

    /// How often a worker renews while its stages run.
    pub fn renew_interval(&self) -> Duration {
        (self.duration / 3).max(Duration::from_millis(10))
    }

    pub(crate) fn chrono_duration(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.duration).unwrap_or(chrono::Duration::MAX)
    }
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new `queued` item. Producer side; not part of the worker cycle.
    async fn enqueue(&self, new: NewWorkItem) -> Result<WorkItem>;

    /// Atomically pick the oldest eligible item and move it to `processing`
    /// under `worker_id`. `Ok(None)` when nothing is eligible right now.
    ///
    /// Eligible means `queued`, or, with a lease policy, `processing` with an
    /// expired lease and fewer than `max_attempts` claims so far.
    async fn claim_next(
        &self,
        worker_id: &str,
        lease: Option<&LeasePolicy>,
    ) -> Result<Option<ClaimedItem>>;

    /// Push the lease deadline forward. `false` if `worker_id` no longer owns it.
    async fn renew_lease(&self, id: WorkId, worker_id: &str, lease: &LeasePolicy) -> Result<bool>;

    /// `processing -> succeeded`, guarded on ownership. `false` if the guard failed.
    async fn mark_succeeded(&self, id: WorkId, worker_id: &str) -> Result<bool>;

    /// `processing -> failed`, guarded on ownership. `false` if the guard failed.
    async fn mark_failed(&self, id: WorkId, worker_id: &str, error: &str) -> Result<bool>;

    /// Fail every item whose lease lapsed after its last permitted attempt.
    /// Returns how many were failed.
    async fn expire_exhausted(&self, lease: &LeasePolicy) -> Result<u64>;

    /// Insert outputs keyed by `(id, index)`. Duplicates are silently skipped;
    /// returns the number of rows actually written.
    async fn insert_outputs(&self, id: WorkId, ideas: &[GeneratedIdea]) -> Result<u64>;

    async fn get(&self, id: WorkId) -> Result<WorkItem>;

    /// Newest first.
    async fn list(&self, status: Option<Status>, limit: i64) -> Result<Vec<WorkItem>>;

    /// Ordered by index.
    async fn outputs(&self, id: WorkId) -> Result<Vec<IdeaOutput>>;
}
