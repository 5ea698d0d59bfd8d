//! Generation engine: retry orchestration and the public coordinator.
//!
//! [`Coordinator::generate`] is the entry point. It consults the cache, runs
//! the [`Orchestrator`] on a miss, and turns exhaustion into a structured
//! [`GenerationFailure`] (or a stale cached batch when the backend is down).

pub mod cancel;
pub mod coordinator;
pub mod diagnostics;
pub mod flight;
pub mod retry;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::model::{AttemptOutcome, GenerationAttempt, RequestId, ValidatedBatch};

pub use cancel::{CancelReason, CancelToken};
pub use coordinator::Coordinator;
pub use diagnostics::AttemptLogBook;
pub use retry::{Orchestrator, RetryConfig, RunError, RunReport};

/// Raw output quoted in a failure is cut to this many characters.
pub const MAX_RAW_OUTPUT_CHARS: usize = 500;

/// Broad cause of an exhausted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The backend could not be reached (breaker open, timeouts, connection errors).
    BackendUnavailable,
    /// The backend answered but never produced acceptable output.
    InvalidOutput,
}

/// Stable code for callers that map failures to user-facing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    ServiceUnavailable,
    CircuitBreakerOpen,
    GenerationTimeout,
    GenerationFailed,
}

impl FailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            FailureCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            FailureCode::GenerationTimeout => "GENERATION_TIMEOUT",
            FailureCode::GenerationFailed => "GENERATION_FAILED",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every attempt for a request failed.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct GenerationFailure {
    pub request_id: RequestId,
    pub reason: FailureReason,
    pub code: FailureCode,
    /// Attempts made, breaker rejections included.
    pub attempts: u32,
    /// Classification of the last attempt.
    pub final_outcome: AttemptOutcome,
    pub attempt_log: Vec<GenerationAttempt>,
    /// Last text the backend returned, truncated.
    pub last_raw_output: Option<String>,
    pub message: String,
    pub suggestion: String,
    /// Remaining breaker cooldown, when the breaker rejected the last attempt.
    pub retry_after: Option<Duration>,
    /// Expired cached result for the same request, if one exists.
    pub stale: Option<Box<ValidatedBatch>>,
}

impl GenerationFailure {
    /// Summarize an exhausted attempt log.
    ///
    /// `breaker_retry_after` is set when the final attempt was rejected by an
    /// open breaker.
    pub fn from_attempts(
        request_id: RequestId,
        attempt_log: Vec<GenerationAttempt>,
        breaker_retry_after: Option<Duration>,
        attempt_timeout: Duration,
    ) -> Self {
        let attempts = attempt_log.len() as u32;
        let final_outcome = attempt_log
            .last()
            .map(|a| a.outcome)
            .unwrap_or(AttemptOutcome::TransientError);
        let last_raw_output = attempt_log
            .iter()
            .rev()
            .find_map(|a| a.raw_output.as_deref())
            .map(|raw| truncate(raw, MAX_RAW_OUTPUT_CHARS));

        let reason = if final_outcome.is_transient() {
            FailureReason::BackendUnavailable
        } else {
            FailureReason::InvalidOutput
        };

        let (code, message, suggestion) = match (breaker_retry_after, final_outcome) {
            (Some(wait), _) => (
                FailureCode::CircuitBreakerOpen,
                "Too many consecutive failures. Service temporarily blocked.".to_string(),
                format!(
                    "Wait {}s before retrying, or check that the generation backend is healthy",
                    wait.as_secs().max(1)
                ),
            ),
            (None, AttemptOutcome::Timeout) => (
                FailureCode::GenerationTimeout,
                format!(
                    "Generation exceeded {} second timeout",
                    attempt_timeout.as_secs()
                ),
                "Try a simpler topic or fewer items".to_string(),
            ),
            (None, AttemptOutcome::TransientError) => (
                FailureCode::ServiceUnavailable,
                "Generation service temporarily unavailable".to_string(),
                "Check that the generation backend is reachable and try again".to_string(),
            ),
            (None, _) => (
                FailureCode::GenerationFailed,
                format!("Failed to generate valid content after {attempts} attempts"),
                "Try simplifying your topic or use a larger model".to_string(),
            ),
        };

        Self {
            request_id,
            reason,
            code,
            attempts,
            final_outcome,
            attempt_log,
            last_raw_output,
            message,
            suggestion,
            retry_after: breaker_retry_after,
            stale: None,
        }
    }

    pub fn is_backend_unavailable(&self) -> bool {
        self.reason == FailureReason::BackendUnavailable
    }
}

/// Why `generate` returned no batch.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Failed(Box<GenerationFailure>),

    #[error("request {request_id} {reason} after {attempts} attempts")]
    Cancelled {
        request_id: RequestId,
        reason: CancelReason,
        attempts: u32,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GenerateError {
    pub fn failure(&self) -> Option<&GenerationFailure> {
        match self {
            GenerateError::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GenerateError::Cancelled { .. })
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("short", 10), "short");
    }
}
