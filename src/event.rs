//! Notifications published to the event bus.
//!
//! Events describe claims, not outcomes. Publishing is fire-and-forget:
//! callers log a failed publish and move on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::model::ClaimedItem;

/// Default bus topic for [`IdeaClaimed`].
pub const SUBJECT_IDEA_CLAIMED: &str = "idea_claimed";

/// Emitted once a worker owns a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdeaClaimed {
    pub request_id: String,
    pub owner_key: String,
    pub topic: String,
    pub claimed_by: String,
}

impl From<&ClaimedItem> for IdeaClaimed {
    fn from(item: &ClaimedItem) -> Self {
        Self {
            request_id: item.id.to_string(),
            owner_key: item.owner_key.clone(),
            topic: item.topic.clone(),
            claimed_by: item.claimed_by.clone(),
        }
    }
}

/// A transport that accepts small JSON payloads on named subjects.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()>;
}

/// A published message as seen by a [`ChannelBus`] subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// In-process bus over a tokio broadcast channel.
#[derive(Clone)]
pub struct ChannelBus {
    tx: broadcast::Sender<BusMessage>,
}

impl ChannelBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventBus for ChannelBus {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
        self.tx
            .send(BusMessage {
                subject: subject.to_string(),
                payload: payload.to_vec(),
            })
            .map(|_| ())
            .map_err(|_| Error::Bus("no subscribers".to_string()))
    }
}
