//! Request queue operations: enqueue, claim, lease renewal, terminal
//! transitions and idempotent output persistence.
//!
//! Every status-changing statement is a single conditional UPDATE. The claim
//! statement picks the oldest eligible row under `FOR UPDATE SKIP LOCKED` and
//! re-checks eligibility in its own WHERE clause, so a racing worker either
//! skips the locked row or finds the predicate false once the winner commits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{ClaimedItem, GeneratedIdea, IdeaOutput, NewWorkItem, Status, WorkId, WorkItem};
use crate::storage::{LeasePolicy, QueueStore};
use crate::telemetry::metrics;

const CLAIM_NEXT: &str = "
    WITH picked AS (
        SELECT id
        FROM idea_requests
        WHERE status = 'queued'
           OR ($2::float8 IS NOT NULL
               AND status = 'processing'
               AND lease_expires_at < now()
               AND attempts < $3)
        ORDER BY created_at ASC, id ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    UPDATE idea_requests ir
    SET status = 'processing',
        started_at = COALESCE(ir.started_at, now()),
        locked_at = now(),
        locked_by = $1,
        lease_expires_at = now() + make_interval(secs => $2::float8),
        attempts = ir.attempts + 1
    FROM picked
    WHERE ir.id = picked.id
      AND (ir.status = 'queued'
           OR ($2::float8 IS NOT NULL
               AND ir.status = 'processing'
               AND ir.lease_expires_at < now()
               AND ir.attempts < $3))
    RETURNING ir.id, ir.owner_key, ir.topic, ir.attempts, ir.locked_at, ir.lease_expires_at";

const SELECT_COLUMNS: &str = "id, owner_key, topic, status, attempts, locked_by, created_at, started_at, locked_at, lease_expires_at, finished_at, last_error";

/// `attempts` is an INT4 column; larger limits saturate instead of wrapping.
fn attempts_limit(max_attempts: u32) -> i32 {
    i32::try_from(max_attempts).unwrap_or(i32::MAX)
}

fn record_transition(from: &'static str, to: &'static str) {
    metrics::work_state_transitions()
        .add(1, &[KeyValue::new("from", from), KeyValue::new("to", to)]);
}

#[async_trait]
impl QueueStore for super::Db {
    async fn enqueue(&self, new: NewWorkItem) -> Result<WorkItem> {
        let row: WorkItemRow = sqlx::query_as(&format!(
            "INSERT INTO idea_requests (id, owner_key, topic, status, created_at)
             VALUES ($1, $2, $3, 'queued', now())
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&new.owner_key)
        .bind(&new.topic)
        .fetch_one(&self.pool)
        .await?;

        metrics::work_enqueued().add(1, &[]);
        row.try_into_work_item()
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        lease: Option<&LeasePolicy>,
    ) -> Result<Option<ClaimedItem>> {
        let lease_secs = lease.map(|l| l.duration.as_secs_f64());
        let max_attempts = lease.map_or(i32::MAX, |l| attempts_limit(l.max_attempts));

        let row: Option<(Uuid, String, String, i32, DateTime<Utc>, Option<DateTime<Utc>>)> =
            sqlx::query_as(CLAIM_NEXT)
                .bind(worker_id)
                .bind(lease_secs)
                .bind(max_attempts)
                .fetch_optional(&self.pool)
                .await?;

        let Some((id, owner_key, topic, attempts, locked_at, lease_expires_at)) = row else {
            return Ok(None);
        };

        if attempts == 1 {
            record_transition("queued", "processing");
        } else {
            record_transition("processing", "processing");
        }

        Ok(Some(ClaimedItem {
            id: WorkId(id),
            owner_key,
            topic,
            claimed_by: worker_id.to_string(),
            attempt: attempts as u32,
            locked_at,
            lease_expires_at,
        }))
    }

    async fn renew_lease(&self, id: WorkId, worker_id: &str, lease: &LeasePolicy) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE idea_requests
             SET lease_expires_at = now() + make_interval(secs => $3::float8)
             WHERE id = $1 AND status = 'processing' AND locked_by = $2",
        )
        .bind(id.0)
        .bind(worker_id)
        .bind(lease.duration.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn mark_succeeded(&self, id: WorkId, worker_id: &str) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE idea_requests
             SET status = 'succeeded', finished_at = now(), lease_expires_at = NULL
             WHERE id = $1 AND status = 'processing' AND locked_by = $2",
        )
        .bind(id.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 1 {
            record_transition("processing", "succeeded");
        }
        Ok(rows_affected == 1)
    }

    async fn mark_failed(&self, id: WorkId, worker_id: &str, error: &str) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE idea_requests
             SET status = 'failed', finished_at = now(), lease_expires_at = NULL, last_error = $3
             WHERE id = $1 AND status = 'processing' AND locked_by = $2",
        )
        .bind(id.0)
        .bind(worker_id)
        .bind(error)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 1 {
            record_transition("processing", "failed");
        }
        Ok(rows_affected == 1)
    }

    async fn expire_exhausted(&self, lease: &LeasePolicy) -> Result<u64> {
        let rows_affected = sqlx::query(
            "UPDATE idea_requests
             SET status = 'failed',
                 finished_at = now(),
                 lease_expires_at = NULL,
                 last_error = 'lease expired after ' || attempts || ' attempts'
             WHERE status = 'processing'
               AND lease_expires_at < now()
               AND attempts >= $1",
        )
        .bind(attempts_limit(lease.max_attempts))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected > 0 {
            metrics::work_state_transitions().add(
                rows_affected,
                &[
                    KeyValue::new("from", "processing"),
                    KeyValue::new("to", "failed"),
                ],
            );
        }
        Ok(rows_affected)
    }

    async fn insert_outputs(&self, id: WorkId, ideas: &[GeneratedIdea]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for (idx, idea) in ideas.iter().enumerate() {
            inserted += sqlx::query(
                "INSERT INTO idea_outputs (request_id, idx, title, hook, script, cta)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (request_id, idx) DO NOTHING",
            )
            .bind(id.0)
            .bind(idx as i32)
            .bind(&idea.title)
            .bind(&idea.hook)
            .bind(&idea.script)
            .bind(&idea.cta)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;

        metrics::outputs_inserted().add(inserted, &[]);
        Ok(inserted)
    }

    async fn get(&self, id: WorkId) -> Result<WorkItem> {
        let row: Option<WorkItemRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM idea_requests WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("work item {id}")))?
            .try_into_work_item()
    }

    async fn list(&self, status: Option<Status>, limit: i64) -> Result<Vec<WorkItem>> {
        let rows: Vec<WorkItemRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM idea_requests
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC, id DESC
             LIMIT $2"
        ))
        .bind(status.map(Status::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(WorkItemRow::try_into_work_item)
            .collect()
    }

    async fn outputs(&self, id: WorkId) -> Result<Vec<IdeaOutput>> {
        let rows: Vec<IdeaOutputRow> = sqlx::query_as(
            "SELECT request_id, idx, title, hook, script, cta, created_at
             FROM idea_outputs WHERE request_id = $1 ORDER BY idx",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(IdeaOutput::from).collect())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: Uuid,
    owner_key: String,
    topic: String,
    status: String,
    attempts: i32,
    locked_by: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    locked_at: Option<DateTime<Utc>>,
    lease_expires_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl WorkItemRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            id: WorkId(self.id),
            owner_key: self.owner_key,
            topic: self.topic,
            status: self.status.parse()?,
            attempts: self.attempts as u32,
            locked_by: self.locked_by,
            created_at: self.created_at,
            started_at: self.started_at,
            locked_at: self.locked_at,
            lease_expires_at: self.lease_expires_at,
            finished_at: self.finished_at,
            last_error: self.last_error,
        })
    }
}

#[derive(sqlx::FromRow)]
struct IdeaOutputRow {
    request_id: Uuid,
    idx: i32,
    title: String,
    hook: String,
    script: String,
    cta: String,
    created_at: DateTime<Utc>,
}

impl From<IdeaOutputRow> for IdeaOutput {
    fn from(row: IdeaOutputRow) -> Self {
        IdeaOutput {
            request_id: WorkId(row.request_id),
            idx: row.idx as u32,
            idea: GeneratedIdea {
                title: row.title,
                hook: row.hook,
                script: row.script,
                cta: row.cta,
            },
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_limit_saturates_at_int4_max() {
        assert_eq!(attempts_limit(3), 3);
        assert_eq!(attempts_limit(i32::MAX as u32), i32::MAX);
        assert_eq!(attempts_limit(u32::MAX), i32::MAX);
    }
}
