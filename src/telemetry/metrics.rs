//! Metric instrument factories for hookify-worker.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Instruments are built on each call from the `hookify-worker` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for hookify-worker instruments.
fn meter() -> Meter {
    opentelemetry::global::meter(super::INSTRUMENTATION_SCOPE)
}

/// Counter: requests inserted by producers.
pub fn work_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("hookify.work.enqueued")
        .with_description("Number of idea requests enqueued")
        .build()
}

/// Counter: claim attempts.
/// Labels: `worker_id`, `result` ("claimed" | "empty" | "error").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("hookify.work.claims")
        .with_description("Number of claim attempts by outcome")
        .build()
}

/// Counter: work item status transitions.
/// Labels: `from`, `to`.
pub fn work_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("hookify.work.state_transitions")
        .with_description("Number of work item status transitions")
        .build()
}

/// Counter: idea output rows actually written (duplicates excluded).
pub fn outputs_inserted() -> Counter<u64> {
    meter()
        .u64_counter("hookify.outputs.inserted")
        .with_description("Number of idea output rows inserted")
        .build()
}

/// Counter: bus publishes.
/// Labels: `subject`, `result` ("ok" | "error").
pub fn notifications() -> Counter<u64> {
    meter()
        .u64_counter("hookify.bus.notifications")
        .with_description("Number of event bus publishes")
        .build()
}

/// Histogram: stage duration in milliseconds.
/// Labels: `stage`, `result` ("ok" | "error").
pub fn stage_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("hookify.stage.duration_ms")
        .with_description("Post-claim stage duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: LLM token usage.
/// Labels: `model`, `provider`, `direction` ("input" | "output").
pub fn llm_tokens() -> Counter<u64> {
    meter()
        .u64_counter("hookify.llm.tokens")
        .with_description("LLM token usage")
        .build()
}
