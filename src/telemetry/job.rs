//! Job execution span helpers.
//!
//! Provides span creation and state-transition recording for jobs
//! flowing through the queue.

use tracing::Span;

use crate::model::JobId;

/// Start a span for one job execution attempt.
///
/// The `job.status` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_job_span(job_id: JobId, attempt: u32) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.id" = %job_id.0,
        "job.attempt" = attempt,
        "job.status" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
///
/// Emits a tracing `info` event scoped to the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("job.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
