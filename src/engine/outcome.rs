//! Terminal transitions for claimed items.

use std::sync::Arc;
use std::time::Duration;

use super::with_deadline;
use crate::error::{Error, Result};
use crate::model::ClaimedItem;
use crate::storage::QueueStore;

/// Writes `succeeded` / `failed` for items this worker owns.
///
/// Each write is one conditional update on (id, `processing`, owner). If the
/// guard does not hold the row belongs to someone else now (or was already
/// finished) and the call returns [`Error::ClaimLost`].
#[derive(Clone)]
pub struct OutcomeRecorder {
    store: Arc<dyn QueueStore>,
    deadline: Duration,
}

impl OutcomeRecorder {
    pub fn new(store: Arc<dyn QueueStore>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    pub async fn succeed(&self, item: &ClaimedItem) -> Result<()> {
        let written = with_deadline(
            "mark_succeeded",
            self.deadline,
            self.store.mark_succeeded(item.id, &item.claimed_by),
        )
        .await?;
        guard(written, item)
    }

    pub async fn fail(&self, item: &ClaimedItem, reason: &str) -> Result<()> {
        let written = with_deadline(
            "mark_failed",
            self.deadline,
            self.store.mark_failed(item.id, &item.claimed_by, reason),
        )
        .await?;
        guard(written, item)
    }
}

fn guard(written: bool, item: &ClaimedItem) -> Result<()> {
    if written {
        Ok(())
    } else {
        Err(Error::ClaimLost {
            id: item.id,
            worker_id: item.claimed_by.clone(),
        })
    }
}
