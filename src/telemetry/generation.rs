//! Request-level spans.

use tracing::Span;

use crate::model::{GenerationAttempt, RequestId, RequestKind};

/// Span covering one `generate` call. `generation.cache_status` and
/// `generation.attempts` are filled in when the call finishes.
pub fn start_generation_span(kind: RequestKind, request_id: &RequestId, cache_key: &str) -> Span {
    tracing::info_span!(
        "generation.run",
        "generation.kind" = %kind,
        "generation.request_id" = %request_id,
        "generation.cache_key" = cache_key,
        "generation.cache_status" = tracing::field::Empty,
        "generation.attempts" = tracing::field::Empty,
    )
}

/// Emit an `attempt_finished` event inside `span`.
pub fn record_attempt(span: &Span, attempt: &GenerationAttempt) {
    span.in_scope(|| {
        tracing::info!(
            attempt = attempt.attempt_number,
            strictness = %attempt.prompt_strictness,
            outcome = %attempt.outcome,
            duration_ms = attempt.duration_ms,
            "attempt_finished"
        );
    });
}

pub fn record_finish(span: &Span, cache_status: &str, attempts: u32) {
    span.record("generation.cache_status", cache_status);
    span.record("generation.attempts", attempts);
}
