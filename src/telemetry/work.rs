//! Work execution span helpers.
//!
//! Provides span creation and state-transition recording for work items
//! flowing through a worker.

use tracing::Span;

use crate::model::work::WorkId;

/// Start a span for one work item handled by one worker.
///
/// The `work.status` field is declared empty and is filled by
/// [`record_state_transition`].
pub fn start_work_span(worker_id: u32, work_id: WorkId) -> Span {
    tracing::info_span!(
        "work.execute",
        "worker.id" = worker_id,
        "work.id" = %work_id.0,
        "work.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the given span.
///
/// Emits a tracing `info` event scoped to the span and updates its
/// `work.status` field.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("work.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
