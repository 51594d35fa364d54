//! Worker engine: claim, run post-claim stages, record the outcome.

pub mod claim;
pub mod outcome;
pub mod stage;
pub mod worker;

pub use claim::Claimer;
pub use outcome::OutcomeRecorder;
pub use stage::{GenerateStage, NotifyStage, Stage, StageKind};
pub use worker::{IterationOutcome, Shutdown, WorkerConfig, WorkerLoop};

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Bound a store round trip. Exceeding the deadline is a store failure.
pub(crate) async fn with_deadline<T>(
    operation: &'static str,
    after: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| Error::Timeout { operation, after })?
}
