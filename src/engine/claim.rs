//! Worker-scoped claim protocol.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::{debug, warn};

use super::with_deadline;
use crate::error::Result;
use crate::model::ClaimedItem;
use crate::storage::{LeasePolicy, QueueStore};
use crate::telemetry::metrics;

/// Claims items for one worker identity.
///
/// A claim is one conditional store operation; nothing is retried here.
/// `Ok(None)` means nothing was eligible at evaluation time, which is not an
/// error. Store failures and deadline overruns come back as `Err`.
#[derive(Clone)]
pub struct Claimer {
    store: Arc<dyn QueueStore>,
    worker_id: String,
    deadline: Duration,
    lease: Option<LeasePolicy>,
}

impl Claimer {
    pub fn new(
        store: Arc<dyn QueueStore>,
        worker_id: impl Into<String>,
        deadline: Duration,
        lease: Option<LeasePolicy>,
    ) -> Self {
        Self {
            store,
            worker_id: worker_id.into(),
            deadline,
            lease,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn lease(&self) -> Option<&LeasePolicy> {
        self.lease.as_ref()
    }

    pub async fn claim(&self) -> Result<Option<ClaimedItem>> {
        let result = with_deadline(
            "claim",
            self.deadline,
            self.store.claim_next(&self.worker_id, self.lease.as_ref()),
        )
        .await;

        let label = match &result {
            Ok(Some(_)) => "claimed",
            Ok(None) => "empty",
            Err(_) => "error",
        };
        metrics::claims().add(
            1,
            &[
                KeyValue::new("worker_id", self.worker_id.clone()),
                KeyValue::new("result", label),
            ],
        );

        result
    }

    /// Extend the lease on `item`. Returns `false` once ownership is gone.
    /// Without a lease policy there is nothing to renew.
    pub async fn renew(&self, item: &ClaimedItem) -> Result<bool> {
        let Some(lease) = &self.lease else {
            return Ok(true);
        };
        let renewed = with_deadline(
            "renew_lease",
            self.deadline,
            self.store.renew_lease(item.id, &self.worker_id, lease),
        )
        .await?;
        if renewed {
            debug!(id = %item.id, "lease renewed");
        } else {
            warn!(id = %item.id, worker_id = %self.worker_id, "lease lost");
        }
        Ok(renewed)
    }

    /// Fail items whose final lease lapsed. No-op without a lease policy.
    pub async fn expire_exhausted(&self) -> Result<u64> {
        let Some(lease) = &self.lease else {
            return Ok(0);
        };
        let failed =
            with_deadline("expire_exhausted", self.deadline, self.store.expire_exhausted(lease))
                .await?;
        if failed > 0 {
            warn!(failed, max_attempts = lease.max_attempts, "failed items with exhausted leases");
        }
        Ok(failed)
    }
}
