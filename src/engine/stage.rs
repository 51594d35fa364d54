//! Post-claim side-effect stages.
//!
//! A worker runs its stages in order against each claimed item. A required
//! stage failing stops the pipeline; a best-effort stage failing is logged
//! and the pipeline continues.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::with_deadline;
use crate::error::{Error, Result};
use crate::event::{EventBus, IdeaClaimed};
use crate::llm::IdeaGenerator;
use crate::model::ClaimedItem;
use crate::storage::QueueStore;

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Best-effort stages never fail the item or halt the worker.
    fn best_effort(&self) -> bool {
        false
    }

    async fn run(&self, item: &ClaimedItem) -> Result<()>;
}

/// Stage names accepted in `WORKER_STAGES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Notify,
    Generate,
}

impl StageKind {
    /// Parse an ordered, comma-separated list. Duplicates are rejected.
    pub fn parse_list(raw: &str) -> Result<Vec<StageKind>> {
        let mut stages = Vec::new();
        for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let kind: StageKind = name.parse()?;
            if stages.contains(&kind) {
                return Err(Error::Config(format!("stage {name} listed twice")));
            }
            stages.push(kind);
        }
        Ok(stages)
    }
}

impl std::str::FromStr for StageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "notify" => Ok(StageKind::Notify),
            "generate" => Ok(StageKind::Generate),
            other => Err(Error::Config(format!("unknown stage: {other}"))),
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StageKind::Notify => "notify",
            StageKind::Generate => "generate",
        })
    }
}

// ---------------------------------------------------------------------------
// Notify
// ---------------------------------------------------------------------------

/// Publishes an [`IdeaClaimed`] notification.
///
/// The publish is bounded by `publish_timeout`; a bus that never answers
/// surfaces as [`Error::Timeout`] and the pipeline moves on.
pub struct NotifyStage {
    bus: Arc<dyn EventBus>,
    subject: String,
    publish_timeout: Duration,
}

impl NotifyStage {
    pub fn new(
        bus: Arc<dyn EventBus>,
        subject: impl Into<String>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            bus,
            subject: subject.into(),
            publish_timeout,
        }
    }
}

#[async_trait]
impl Stage for NotifyStage {
    fn name(&self) -> &'static str {
        "notify"
    }

    fn best_effort(&self) -> bool {
        true
    }

    async fn run(&self, item: &ClaimedItem) -> Result<()> {
        let payload = serde_json::to_vec(&IdeaClaimed::from(item))?;
        with_deadline(
            "publish",
            self.publish_timeout,
            self.bus.publish(&self.subject, &payload),
        )
        .await?;
        debug!(id = %item.id, subject = %self.subject, "published claim notification");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Generate
// ---------------------------------------------------------------------------

/// Generates ideas for the topic and persists them idempotently.
///
/// Generation errors are item-specific. The output insert is a store call:
/// its failure is systemic, and the item is never marked `succeeded`
/// without its outputs.
pub struct GenerateStage {
    generator: Arc<dyn IdeaGenerator>,
    store: Arc<dyn QueueStore>,
    store_timeout: Duration,
}

impl GenerateStage {
    pub fn new(
        generator: Arc<dyn IdeaGenerator>,
        store: Arc<dyn QueueStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            store,
            store_timeout,
        }
    }
}

#[async_trait]
impl Stage for GenerateStage {
    fn name(&self) -> &'static str {
        "generate"
    }

    async fn run(&self, item: &ClaimedItem) -> Result<()> {
        let ideas = self.generator.generate(&item.topic).await?;

        let inserted = with_deadline(
            "insert_outputs",
            self.store_timeout,
            self.store.insert_outputs(item.id, &ideas),
        )
        .await?;

        info!(
            id = %item.id,
            generated = ideas.len(),
            inserted,
            "ideas persisted"
        );
        Ok(())
    }
}
