//! In-process queue store.
//!
//! One mutex guards the whole table, so every trait call is a single
//! critical section: the same atomicity Postgres gives the claim statement.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{LeasePolicy, QueueStore};
use crate::error::{Error, Result};
use crate::model::{
    ClaimedItem, GeneratedIdea, IdeaOutput, NewWorkItem, Status, WorkId, WorkItem,
};

#[derive(Default)]
struct MemoryState {
    items: HashMap<WorkId, WorkItem>,
    /// Insertion order, which is creation order.
    order: Vec<WorkId>,
    outputs: BTreeMap<(WorkId, u32), IdeaOutput>,
}

/// `QueueStore` backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn claimable(item: &WorkItem, lease: Option<&LeasePolicy>, now: chrono::DateTime<Utc>) -> bool {
    match (item.status, lease) {
        (Status::Queued, _) => true,
        (Status::Processing, Some(lease)) => {
            item.lease_expires_at.is_some_and(|at| at < now) && item.attempts < lease.max_attempts
        }
        _ => false,
    }
}

fn owned_by(item: &WorkItem, worker_id: &str) -> bool {
    item.status == Status::Processing && item.locked_by.as_deref() == Some(worker_id)
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, new: NewWorkItem) -> Result<WorkItem> {
        let item = WorkItem {
            id: WorkId::new(),
            owner_key: new.owner_key,
            topic: new.topic,
            status: Status::Queued,
            attempts: 0,
            locked_by: None,
            created_at: Utc::now(),
            started_at: None,
            locked_at: None,
            lease_expires_at: None,
            finished_at: None,
            last_error: None,
        };
        let mut state = self.state.lock().await;
        state.order.push(item.id);
        state.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        lease: Option<&LeasePolicy>,
    ) -> Result<Option<ClaimedItem>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = Utc::now();

        let Some(id) = state
            .order
            .iter()
            .copied()
            .find(|id| state.items.get(id).is_some_and(|i| claimable(i, lease, now)))
        else {
            return Ok(None);
        };

        let item = state
            .items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))?;

        // A reclaim keeps `processing`; only a fresh claim moves the status.
        if item.status == Status::Queued {
            item.status = item.status.transition(Status::Processing)?;
        }
        item.started_at.get_or_insert(now);
        item.locked_at = Some(now);
        item.locked_by = Some(worker_id.to_string());
        item.lease_expires_at = lease.map(|l| now + l.chrono_duration());
        item.attempts += 1;

        Ok(Some(ClaimedItem {
            id,
            owner_key: item.owner_key.clone(),
            topic: item.topic.clone(),
            claimed_by: worker_id.to_string(),
            attempt: item.attempts,
            locked_at: now,
            lease_expires_at: item.lease_expires_at,
        }))
    }

    async fn renew_lease(&self, id: WorkId, worker_id: &str, lease: &LeasePolicy) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.items.get_mut(&id) {
            Some(item) if owned_by(item, worker_id) => {
                item.lease_expires_at = Some(Utc::now() + lease.chrono_duration());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_succeeded(&self, id: WorkId, worker_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.items.get_mut(&id) {
            Some(item) if owned_by(item, worker_id) => {
                item.status = item.status.transition(Status::Succeeded)?;
                item.finished_at = Some(Utc::now());
                item.lease_expires_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: WorkId, worker_id: &str, error: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.items.get_mut(&id) {
            Some(item) if owned_by(item, worker_id) => {
                item.status = item.status.transition(Status::Failed)?;
                item.finished_at = Some(Utc::now());
                item.lease_expires_at = None;
                item.last_error = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_exhausted(&self, lease: &LeasePolicy) -> Result<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut failed = 0;
        for item in state.items.values_mut() {
            let lapsed = item.lease_expires_at.is_some_and(|at| at < now);
            if item.status == Status::Processing && lapsed && item.attempts >= lease.max_attempts {
                item.status = item.status.transition(Status::Failed)?;
                item.finished_at = Some(now);
                item.lease_expires_at = None;
                item.last_error = Some(format!("lease expired after {} attempts", item.attempts));
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn insert_outputs(&self, id: WorkId, ideas: &[GeneratedIdea]) -> Result<u64> {
        let mut state = self.state.lock().await;
        if !state.items.contains_key(&id) {
            return Err(Error::NotFound(format!("work item {id}")));
        }
        let now = Utc::now();
        let mut inserted = 0;
        for (idx, idea) in ideas.iter().enumerate() {
            let idx = idx as u32;
            state.outputs.entry((id, idx)).or_insert_with(|| {
                inserted += 1;
                IdeaOutput {
                    request_id: id,
                    idx,
                    idea: idea.clone(),
                    created_at: now,
                }
            });
        }
        Ok(inserted)
    }

    async fn get(&self, id: WorkId) -> Result<WorkItem> {
        let state = self.state.lock().await;
        state
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))
    }

    async fn list(&self, status: Option<Status>, limit: i64) -> Result<Vec<WorkItem>> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.items.get(id))
            .filter(|item| status.is_none_or(|s| item.status == s))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn outputs(&self, id: WorkId) -> Result<Vec<IdeaOutput>> {
        let state = self.state.lock().await;
        Ok(state
            .outputs
            .range((id, 0)..=(id, u32::MAX))
            .map(|(_, out)| out.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn idea(n: usize) -> GeneratedIdea {
        GeneratedIdea {
            title: format!("title {n}"),
            hook: format!("hook {n}"),
            script: format!("script {n}"),
            cta: format!("cta {n}"),
        }
    }

    #[tokio::test]
    async fn claims_oldest_first() {
        let store = MemoryStore::new();
        let first = store.enqueue(NewWorkItem::new("o1", "rust")).await.unwrap();
        let second = store.enqueue(NewWorkItem::new("o2", "go")).await.unwrap();

        let a = store.claim_next("w1", None).await.unwrap().unwrap();
        let b = store.claim_next("w1", None).await.unwrap().unwrap();
        assert_eq!(a.id, first.id);
        assert_eq!(b.id, second.id);
        assert!(store.claim_next("w1", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_stamps_ownership_fields() {
        let store = MemoryStore::new();
        let item = store.enqueue(NewWorkItem::new("owner", "topic")).await.unwrap();
        assert!(item.started_at.is_none() && item.locked_by.is_none());

        let claimed = store.claim_next("w7", None).await.unwrap().unwrap();
        assert_eq!(claimed.claimed_by, "w7");
        assert_eq!(claimed.attempt, 1);

        let stored = store.get(item.id).await.unwrap();
        assert_eq!(stored.status, Status::Processing);
        assert_eq!(stored.locked_by.as_deref(), Some("w7"));
        assert_eq!(stored.started_at, Some(claimed.locked_at));
        assert!(stored.finished_at.is_none());
        assert!(stored.lease_expires_at.is_none());
    }

    #[tokio::test]
    async fn terminal_write_requires_ownership() {
        let store = MemoryStore::new();
        let item = store.enqueue(NewWorkItem::new("o", "t")).await.unwrap();

        // Not yet claimed.
        assert!(!store.mark_succeeded(item.id, "w1").await.unwrap());

        store.claim_next("w1", None).await.unwrap().unwrap();
        assert!(!store.mark_succeeded(item.id, "w2").await.unwrap());
        assert!(store.mark_succeeded(item.id, "w1").await.unwrap());

        // Terminal: no second write, success or failure.
        assert!(!store.mark_failed(item.id, "w1", "late").await.unwrap());
        let stored = store.get(item.id).await.unwrap();
        assert_eq!(stored.status, Status::Succeeded);
        assert!(stored.last_error.is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_without_resetting_started_at() {
        let store = MemoryStore::new();
        let lease = LeasePolicy::new(Duration::from_millis(20), 3);
        let item = store.enqueue(NewWorkItem::new("o", "t")).await.unwrap();

        let first = store.claim_next("w1", Some(&lease)).await.unwrap().unwrap();
        assert!(store.claim_next("w2", Some(&lease)).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let second = store.claim_next("w2", Some(&lease)).await.unwrap().unwrap();
        assert_eq!(second.id, item.id);
        assert_eq!(second.attempt, 2);

        let stored = store.get(item.id).await.unwrap();
        assert_eq!(stored.started_at, Some(first.locked_at));
        assert_eq!(stored.locked_by.as_deref(), Some("w2"));

        // The old owner lost the row.
        assert!(!store.mark_succeeded(item.id, "w1").await.unwrap());
        assert!(!store.renew_lease(item.id, "w1", &lease).await.unwrap());
        assert!(store.mark_succeeded(item.id, "w2").await.unwrap());
    }

    #[tokio::test]
    async fn exhausted_leases_are_failed() {
        let store = MemoryStore::new();
        let lease = LeasePolicy::new(Duration::from_millis(10), 1);
        let item = store.enqueue(NewWorkItem::new("o", "t")).await.unwrap();
        store.claim_next("w1", Some(&lease)).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.claim_next("w2", Some(&lease)).await.unwrap().is_none());
        assert_eq!(store.expire_exhausted(&lease).await.unwrap(), 1);

        let stored = store.get(item.id).await.unwrap();
        assert_eq!(stored.status, Status::Failed);
        assert!(stored.finished_at.is_some());
        assert_eq!(stored.last_error.as_deref(), Some("lease expired after 1 attempts"));
    }

    #[tokio::test]
    async fn outputs_are_idempotent_per_index() {
        let store = MemoryStore::new();
        let item = store.enqueue(NewWorkItem::new("o", "t")).await.unwrap();
        let batch: Vec<_> = (0..3).map(idea).collect();

        assert_eq!(store.insert_outputs(item.id, &batch).await.unwrap(), 3);
        assert_eq!(store.insert_outputs(item.id, &batch).await.unwrap(), 0);

        let rows = store.outputs(item.id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].idx, 2);
        assert_eq!(rows[2].idea, idea(2));
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let store = MemoryStore::new();
        store.enqueue(NewWorkItem::new("o", "a")).await.unwrap();
        store.enqueue(NewWorkItem::new("o", "b")).await.unwrap();
        store.claim_next("w1", None).await.unwrap().unwrap();

        let queued = store.list(Some(Status::Queued), 10).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].topic, "b");
        assert_eq!(store.list(None, 10).await.unwrap().len(), 2);
        assert_eq!(store.list(None, 1).await.unwrap().len(), 1);
    }
}
