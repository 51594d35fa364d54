//! Work execution span helpers.
//!
//! Provides span creation and status-transition recording for claimed
//! requests flowing through a worker.

use tracing::Span;

use crate::model::ClaimedItem;

/// Start a span covering one claimed item, from claim to terminal write.
///
/// The `work.status` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_claim_span(item: &ClaimedItem) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.id" = %item.id,
        "work.owner_key" = %item.owner_key,
        "work.worker_id" = %item.claimed_by,
        "work.attempt" = item.attempt,
        "work.status" = tracing::field::Empty,
    )
}

/// Record a status transition event on the given span.
///
/// Emits a tracing `info` event scoped to the span and updates `work.status`.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("work.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
