//! Worker loop: claim one item, run the stage pipeline, record the outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, warn};

use super::{Claimer, OutcomeRecorder, Stage};
use crate::error::{Error, Result};
use crate::model::{ClaimedItem, WorkId};
use crate::storage::{LeasePolicy, QueueStore};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_claim_span};

/// Configuration for one worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Sleep between claim attempts when nothing is queued.
    pub poll_interval: Duration,
    /// Deadline for each store round trip.
    pub store_timeout: Duration,
    pub lease: Option<LeasePolicy>,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            poll_interval: crate::config::DEFAULT_POLL_INTERVAL,
            store_timeout: crate::config::DEFAULT_STORE_TIMEOUT,
            lease: None,
        }
    }
}

/// Cooperative stop signal shared by any number of loops.
///
/// Observed at the idle sleep and between iterations. An item already
/// claimed is always driven to its terminal write first.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`Shutdown::trigger`] has been called.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// What one iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Nothing was eligible.
    Idle,
    Succeeded(WorkId),
    /// Item-specific failure, recorded as `failed`.
    Failed(WorkId),
    /// Ownership moved elsewhere before the terminal write; nothing written.
    Lost(WorkId),
}

/// The claim/execute/record cycle for one worker identity.
///
/// Stateless between iterations: everything lives in the store.
pub struct WorkerLoop {
    config: WorkerConfig,
    claimer: Claimer,
    recorder: OutcomeRecorder,
    stages: Vec<Box<dyn Stage>>,
    shutdown: Shutdown,
}

impl WorkerLoop {
    pub fn new(
        store: Arc<dyn QueueStore>,
        config: WorkerConfig,
        stages: Vec<Box<dyn Stage>>,
    ) -> Result<Self> {
        if config.worker_id.trim().is_empty() {
            return Err(Error::Config("worker id must not be empty".to_string()));
        }
        let claimer = Claimer::new(
            Arc::clone(&store),
            config.worker_id.clone(),
            config.store_timeout,
            config.lease,
        );
        let recorder = OutcomeRecorder::new(store, config.store_timeout);
        Ok(Self {
            config,
            claimer,
            recorder,
            stages,
            shutdown: Shutdown::new(),
        })
    }

    /// Share a stop signal with other loops.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Run until shutdown or a systemic error.
    pub async fn run(&self) -> Result<()> {
        let stages: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        info!(
            worker_id = %self.config.worker_id,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            ?stages,
            lease = ?self.config.lease,
            "worker started"
        );

        loop {
            if self.shutdown.is_triggered() {
                info!(worker_id = %self.config.worker_id, "worker shutting down");
                return Ok(());
            }

            // Found work: look again immediately.
            if self.run_once().await? == IterationOutcome::Idle {
                tokio::select! {
                    _ = self.shutdown.triggered() => {}
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
    }

    /// One claim/execute/record cycle.
    ///
    /// `Err` means a systemic failure (store unreachable, deadline exceeded,
    /// output write failed); the caller should stop. Item-specific failures
    /// are recorded and reported as [`IterationOutcome::Failed`].
    pub async fn run_once(&self) -> Result<IterationOutcome> {
        let Some(item) = self.claimer.claim().await? else {
            self.claimer.expire_exhausted().await?;
            debug!(worker_id = %self.config.worker_id, "no queued requests");
            return Ok(IterationOutcome::Idle);
        };

        let span = start_claim_span(&item);
        let from = if item.attempt > 1 { "processing" } else { "queued" };
        record_state_transition(&span, from, "processing");

        async {
            info!(topic = %item.topic, "claimed request");

            let result = self.run_stages_holding_lease(&item).await;

            match result {
                Ok(()) => match self.recorder.succeed(&item).await {
                    Ok(()) => {
                        record_state_transition(&span, "processing", "succeeded");
                        Ok(IterationOutcome::Succeeded(item.id))
                    }
                    Err(e @ Error::ClaimLost { .. }) => {
                        warn!(error = %e, "claim lost before success was recorded");
                        Ok(IterationOutcome::Lost(item.id))
                    }
                    Err(e) => {
                        error!(error = %e, kind = e.kind(), "failed to record success; halting");
                        Err(e)
                    }
                },
                Err(e @ Error::ClaimLost { .. }) => {
                    warn!(error = %e, "lease lost while stages ran; abandoning");
                    Ok(IterationOutcome::Lost(item.id))
                }
                Err(e) if e.is_item_specific() => {
                    warn!(error = %e, kind = e.kind(), "request failed");
                    match self.recorder.fail(&item, &e.to_string()).await {
                        Ok(()) => {
                            record_state_transition(&span, "processing", "failed");
                            Ok(IterationOutcome::Failed(item.id))
                        }
                        Err(lost @ Error::ClaimLost { .. }) => {
                            warn!(error = %lost, "claim lost before failure was recorded");
                            Ok(IterationOutcome::Lost(item.id))
                        }
                        Err(e) => {
                            error!(error = %e, kind = e.kind(), "failed to record failure; halting");
                            Err(e)
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, kind = e.kind(), "systemic failure; halting");
                    Err(e)
                }
            }
        }
        .instrument(span.clone())
        .await
    }

    /// Run the stages, renewing the lease alongside when one is configured.
    ///
    /// Returns [`Error::ClaimLost`] as soon as a renewal finds the lease
    /// gone; the unfinished stages are dropped.
    async fn run_stages_holding_lease(&self, item: &ClaimedItem) -> Result<()> {
        let Some(lease) = self.claimer.lease() else {
            return self.run_stages(item).await;
        };

        let work = self.run_stages(item);
        tokio::pin!(work);

        let mut renew = tokio::time::interval(lease.renew_interval());
        renew.tick().await; // first tick fires immediately; the claim just set the lease

        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = renew.tick() => {
                    // A store error here is systemic; a lost lease stops the
                    // remaining stages, which belong to the new owner now.
                    if !self.claimer.renew(item).await? {
                        return Err(Error::ClaimLost {
                            id: item.id,
                            worker_id: item.claimed_by.clone(),
                        });
                    }
                }
            }
        }
    }

    async fn run_stages(&self, item: &ClaimedItem) -> Result<()> {
        for stage in &self.stages {
            let start = Instant::now();
            let result = stage.run(item).await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            metrics::stage_duration_ms().record(
                elapsed_ms,
                &[
                    KeyValue::new("stage", stage.name()),
                    KeyValue::new("result", if result.is_ok() { "ok" } else { "error" }),
                ],
            );

            match result {
                Ok(()) => debug!(stage = stage.name(), elapsed_ms, "stage completed"),
                Err(e) if stage.best_effort() => {
                    warn!(stage = stage.name(), error = %e, "best-effort stage failed; continuing");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
