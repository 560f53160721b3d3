//! Metric instrument factories for session-feedback.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"session-feedback"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for session-feedback instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("session-feedback")
}

/// Counter: enqueue requests.
/// Labels: `result` ("ok" | "duplicate").
pub fn jobs_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("feedback.jobs.enqueued")
        .with_description("Number of enqueue requests")
        .build()
}

/// Counter: finished executions.
/// Labels: `result` ("completed" | "retried" | "failed" | "cancelled").
pub fn job_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("feedback.jobs.outcomes")
        .with_description("Number of finished job executions by outcome")
        .build()
}

/// Counter: persisted job status transitions.
/// Labels: `from`, `to`.
pub fn job_status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("feedback.jobs.status_transitions")
        .with_description("Number of job status transitions")
        .build()
}

/// Counter: analysis provider calls.
/// Labels: `provider`, `result` ("ok" | "error" | "timeout").
pub fn provider_calls() -> Counter<u64> {
    meter()
        .u64_counter("feedback.provider.calls")
        .with_description("Number of analysis provider calls")
        .build()
}

/// Histogram: provider call duration in milliseconds.
/// Labels: `provider`.
pub fn provider_call_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("feedback.provider.duration_ms")
        .with_description("Analysis provider call duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: gaps found by the completeness validator.
/// Labels: `cause`, `severity`.
pub fn gaps_detected() -> Counter<u64> {
    meter()
        .u64_counter("feedback.gaps.detected")
        .with_description("Number of completeness gaps detected")
        .build()
}

/// Histogram: gap-filling rounds used per document.
/// Labels: `complete` ("true" | "false").
pub fn gap_fill_rounds() -> Histogram<u64> {
    meter()
        .u64_histogram("feedback.gaps.fill_rounds")
        .with_description("Gap-filling rounds used per document")
        .build()
}

/// Counter: jobs reset by the stuck-job monitor.
pub fn stuck_jobs_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("feedback.jobs.stuck_reclaimed")
        .with_description("Number of stuck jobs reset to queued")
        .build()
}

/// Counter: cache lookups.
/// Labels: `region`, `result` ("hit" | "miss").
pub fn cache_lookups() -> Counter<u64> {
    meter()
        .u64_counter("feedback.cache.lookups")
        .with_description("Number of cache lookups")
        .build()
}

/// Counter: reclamation passes requested by the system monitor.
pub fn memory_reclamations() -> Counter<u64> {
    meter()
        .u64_counter("feedback.system.reclamations")
        .with_description("Number of memory reclamation passes")
        .build()
}

/// Counter: backlog warnings raised by the system monitor.
pub fn backlog_warnings() -> Counter<u64> {
    meter()
        .u64_counter("feedback.system.backlog_warnings")
        .with_description("Number of queue backlog warnings")
        .build()
}
