//! Event bus over Postgres LISTEN/NOTIFY.
//!
//! `pg_notify` payloads are text and capped at 8000 bytes by Postgres, which
//! is plenty for claim notifications.

use async_trait::async_trait;
use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::event::EventBus;
use crate::telemetry::metrics;

#[async_trait]
impl EventBus for super::Db {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
        let payload = std::str::from_utf8(payload)
            .map_err(|e| Error::Bus(format!("payload is not utf-8: {e}")))?;

        let result = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(subject)
            .bind(payload)
            .execute(self.pool())
            .await;

        metrics::notifications().add(
            1,
            &[
                KeyValue::new("subject", subject.to_string()),
                KeyValue::new("result", if result.is_ok() { "ok" } else { "error" }),
            ],
        );

        result
            .map(|_| ())
            .map_err(|e| Error::Bus(format!("pg_notify on {subject}: {e}")))
    }
}
