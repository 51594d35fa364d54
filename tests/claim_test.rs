//! Claim protocol properties against the in-process store.
//!
//! These run many workers against one shared table and check the queue
//! guarantees: no double claims, nothing lost, monotonic lifecycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use hookify_worker::engine::Claimer;
use hookify_worker::model::{NewWorkItem, Status, WorkId, WorkItem};
use hookify_worker::storage::{LeasePolicy, MemoryStore, QueueStore};

const DEADLINE: Duration = Duration::from_secs(5);

fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

async fn enqueue(store: &MemoryStore, topic: &str) -> WorkItem {
    store
        .enqueue(NewWorkItem::new("acme", topic))
        .await
        .unwrap()
}

fn assert_terminal_fields(item: &WorkItem) {
    assert_eq!(
        item.finished_at.is_some(),
        item.status.is_terminal(),
        "finished_at must be set exactly for terminal items: {item:?}"
    );
    if item.status == Status::Queued {
        assert!(item.locked_by.is_none());
        assert!(item.started_at.is_none());
    }
}

// ---------------------------------------------------------------------------
// Mutual exclusion
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_on_one_item_have_one_winner() {
    let store = store();
    let item = enqueue(&store, "single").await;

    let mut handles = Vec::new();
    for n in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.claim_next(&format!("worker-{n}"), None).await.unwrap()
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        if let Some(claimed) = handle.await.unwrap() {
            winners.push(claimed);
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, item.id);

    let stored = store.get(item.id).await.unwrap();
    assert_eq!(stored.status, Status::Processing);
    assert_eq!(stored.locked_by.as_deref(), Some(winners[0].claimed_by.as_str()));
    assert_eq!(stored.attempts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_item_is_claimed_exactly_once_by_many_workers() {
    let store = store();
    let mut queued = HashSet::new();
    for i in 0..50 {
        queued.insert(enqueue(&store, &format!("topic {i}")).await.id);
    }

    let mut handles = Vec::new();
    for n in 0..8 {
        let claimer = Claimer::new(
            store.clone() as Arc<dyn QueueStore>,
            format!("worker-{n}"),
            DEADLINE,
            None,
        );
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut mine: Vec<WorkId> = Vec::new();
            while let Some(item) = claimer.claim().await.unwrap() {
                assert!(store.mark_succeeded(item.id, &item.claimed_by).await.unwrap());
                mine.push(item.id);
                tokio::task::yield_now().await;
            }
            mine
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "item {id} was claimed twice");
        }
    }
    assert_eq!(seen, queued, "no queued item may be left behind");

    for item in store.list(None, 100).await.unwrap() {
        assert_eq!(item.status, Status::Succeeded);
        assert_terminal_fields(&item);
    }
}

// ---------------------------------------------------------------------------
// Ordering and emptiness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_queue_claims_nothing() {
    let store = store();
    let claimer = Claimer::new(store.clone(), "worker-1", DEADLINE, None);
    assert!(claimer.claim().await.unwrap().is_none());
}

#[tokio::test]
async fn claims_follow_creation_order() {
    let store = store();
    let first = enqueue(&store, "first").await;
    let second = enqueue(&store, "second").await;

    let a = store.claim_next("worker-1", None).await.unwrap().unwrap();
    let b = store.claim_next("worker-1", None).await.unwrap().unwrap();
    assert_eq!(a.id, first.id);
    assert_eq!(b.id, second.id);
    assert!(store.claim_next("worker-1", None).await.unwrap().is_none());
}

#[tokio::test]
async fn processing_items_are_not_claimable_without_a_lease() {
    let store = store();
    enqueue(&store, "held").await;
    store.claim_next("worker-1", None).await.unwrap().unwrap();

    // Even a reclaiming worker with a lease cannot take an item that never had one.
    let lease = LeasePolicy::new(Duration::from_millis(1), 3);
    assert!(store.claim_next("worker-2", Some(&lease)).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn terminal_items_never_move_again() {
    let store = store();
    let item = enqueue(&store, "once").await;
    let claimed = store.claim_next("worker-1", None).await.unwrap().unwrap();

    assert!(store.mark_failed(item.id, "worker-1", "provider down").await.unwrap());
    assert!(!store.mark_succeeded(item.id, "worker-1").await.unwrap());
    assert!(!store.mark_failed(item.id, "worker-1", "again").await.unwrap());
    assert!(store.claim_next("worker-2", None).await.unwrap().is_none());

    let stored = store.get(claimed.id).await.unwrap();
    assert_eq!(stored.status, Status::Failed);
    assert_eq!(stored.last_error.as_deref(), Some("provider down"));
    assert_terminal_fields(&stored);
}

#[tokio::test]
async fn foreign_worker_cannot_finish_an_item() {
    let store = store();
    let item = enqueue(&store, "mine").await;
    store.claim_next("worker-1", None).await.unwrap().unwrap();

    assert!(!store.mark_succeeded(item.id, "worker-2").await.unwrap());
    assert_eq!(store.get(item.id).await.unwrap().status, Status::Processing);
}

// ---------------------------------------------------------------------------
// Leases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_lease_moves_ownership_and_fences_the_old_owner() {
    let store = store();
    let lease = LeasePolicy::new(Duration::from_millis(20), 3);
    let item = enqueue(&store, "slow").await;

    let first = store.claim_next("worker-1", Some(&lease)).await.unwrap().unwrap();
    assert_eq!(first.attempt, 1);
    assert!(first.lease_expires_at.is_some());

    tokio::time::sleep(Duration::from_millis(40)).await;

    let second = store.claim_next("worker-2", Some(&lease)).await.unwrap().unwrap();
    assert_eq!(second.id, item.id);
    assert_eq!(second.attempt, 2);

    // The first owner's late writes are rejected.
    assert!(!store.renew_lease(item.id, "worker-1", &lease).await.unwrap());
    assert!(!store.mark_succeeded(item.id, "worker-1").await.unwrap());
    assert!(store.mark_succeeded(item.id, "worker-2").await.unwrap());
}

#[tokio::test]
async fn renewed_lease_is_not_reclaimed() {
    let store = store();
    let lease = LeasePolicy::new(Duration::from_millis(60), 3);
    let item = enqueue(&store, "kept").await;
    store.claim_next("worker-1", Some(&lease)).await.unwrap().unwrap();

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.renew_lease(item.id, "worker-1", &lease).await.unwrap());
    }
    assert!(store.claim_next("worker-2", Some(&lease)).await.unwrap().is_none());
}

#[tokio::test]
async fn exhausted_item_is_failed_once_attempts_run_out() {
    let store = store();
    let lease = LeasePolicy::new(Duration::from_millis(10), 2);
    let item = enqueue(&store, "crashy").await;

    store.claim_next("worker-1", Some(&lease)).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;
    store.claim_next("worker-2", Some(&lease)).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;

    assert!(store.claim_next("worker-3", Some(&lease)).await.unwrap().is_none());
    assert_eq!(store.expire_exhausted(&lease).await.unwrap(), 1);
    assert_eq!(store.expire_exhausted(&lease).await.unwrap(), 0);

    let stored = store.get(item.id).await.unwrap();
    assert_eq!(stored.status, Status::Failed);
    assert_eq!(stored.attempts, 2);
    assert_terminal_fields(&stored);
}
