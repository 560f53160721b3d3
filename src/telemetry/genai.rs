//! GenAI semantic convention span helpers for provider calls.
//!
//! Uses OpenTelemetry GenAI semantic conventions:
//! - `gen_ai.operation.name`
//! - `gen_ai.request.model`
//! - `gen_ai.provider.name`

use tracing::Span;

/// Start a span for one analysis provider invocation.
///
/// `feedback.sections` lists the requested sections, or `"all"`.
pub fn start_provider_span(provider: &str, sections: &str) -> Span {
    tracing::info_span!(
        "provider.analyze",
        "provider.name" = provider,
        "feedback.sections" = sections,
    )
}

/// Start a span for a chat/completion operation.
pub fn start_chat_span(model: &str, provider: &str) -> Span {
    tracing::info_span!(
        "gen_ai.chat",
        "gen_ai.operation.name" = "chat",
        "gen_ai.request.model" = model,
        "gen_ai.provider.name" = provider,
        "gen_ai.response.chars" = tracing::field::Empty,
    )
}

/// Record the length of a model reply.
pub fn record_response_chars(span: &Span, chars: usize) {
    span.record("gen_ai.response.chars", chars as u64);
}
