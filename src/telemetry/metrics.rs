//! Metric instrument factories.
//!
//! Instruments come from the global `MeterProvider`; with no provider
//! installed they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter(super::INSTRUMENTATION_NAME)
}

/// Counter: `generate` calls.
/// Labels: `kind`, `result` ("fresh" | "cached" | "stale" | "failed" | "cancelled" | "invalid").
pub fn generation_requests() -> Counter<u64> {
    meter()
        .u64_counter("instruct.generation.requests")
        .with_description("Number of generation requests")
        .build()
}

/// Counter: attempts made by the retry orchestrator.
/// Labels: `kind`, `outcome`, `strictness`.
pub fn generation_attempts() -> Counter<u64> {
    meter()
        .u64_counter("instruct.generation.attempts")
        .with_description("Number of generation attempts by outcome")
        .build()
}

/// Counter: taxonomy terms replaced by the validator.
/// Labels: `level`.
pub fn term_corrections() -> Counter<u64> {
    meter()
        .u64_counter("instruct.validation.corrections")
        .with_description("Number of auto-corrected taxonomy terms")
        .build()
}

/// Counter: circuit breaker state changes.
/// Labels: `breaker`, `from`, `to`.
pub fn breaker_transitions() -> Counter<u64> {
    meter()
        .u64_counter("instruct.breaker.transitions")
        .with_description("Number of circuit breaker state transitions")
        .build()
}

/// Counter: cache reads through [`crate::cache::Cache::get`].
/// Labels: `result` ("hit" | "miss" | "expired").
pub fn cache_lookups() -> Counter<u64> {
    meter()
        .u64_counter("instruct.cache.lookups")
        .with_description("Number of cache lookups by result")
        .build()
}

/// Counter: store-level operations.
/// Labels: `store`, `operation`.
pub fn cache_operations() -> Counter<u64> {
    meter()
        .u64_counter("instruct.cache.operations")
        .with_description("Number of cache store operations")
        .build()
}

/// Histogram: duration in milliseconds.
/// Labels: `operation` ("generate" | "backend_call").
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("instruct.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
