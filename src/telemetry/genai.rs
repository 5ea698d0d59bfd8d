//! GenAI semantic-convention spans for backend calls.
//!
//! Fields follow the OpenTelemetry GenAI conventions (`gen_ai.operation.name`,
//! `gen_ai.request.model`, `gen_ai.provider.name`). Prompt and completion
//! sizes are in characters; the text backend contract does not report tokens.

use tracing::Span;

/// Span around one chat completion. Size fields start empty.
pub fn start_chat_span(model: &str, provider: &str) -> Span {
    tracing::info_span!(
        "gen_ai.chat",
        "gen_ai.operation.name" = "chat",
        "gen_ai.request.model" = model,
        "gen_ai.provider.name" = provider,
        "gen_ai.request.max_tokens" = tracing::field::Empty,
        "gen_ai.prompt.chars" = tracing::field::Empty,
        "gen_ai.completion.chars" = tracing::field::Empty,
        "error.type" = tracing::field::Empty,
    )
}

pub fn record_prompt(span: &Span, prompt_chars: usize, max_tokens: u64) {
    span.record("gen_ai.prompt.chars", prompt_chars as u64);
    span.record("gen_ai.request.max_tokens", max_tokens);
}

pub fn record_completion(span: &Span, completion_chars: usize) {
    span.record("gen_ai.completion.chars", completion_chars as u64);
}

pub fn record_error(span: &Span, error_type: &str) {
    span.record("error.type", error_type);
}
