//! Bounded retry loop with escalating prompt strictness.
//!
//! Each request runs `Attempting(1) -> Attempting(2) -> ... -> Success |
//! Exhausted`. Every attempt asks the breaker first; a rejection is recorded
//! as a transient attempt without touching the backend. Attempts that reach
//! the backend report their result to the breaker: a reply of any shape is a
//! success for the breaker, a timeout or connection error a failure.

use chrono::Utc;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Span, debug, warn};

use super::cancel::{CancelReason, CancelToken};
use super::GenerationFailure;
use crate::breaker::{CallPermit, CircuitBreaker};
use crate::llm::{Backend, BackendError};
use crate::model::{
    AttemptOutcome, GenerationAttempt, GenerationRequest, Strictness, ValidatedBatch,
};
use crate::parser;
use crate::prompt::{self, Feedback, PromptSpec};
use crate::taxonomy::Taxonomy;
use crate::telemetry::{generation, metrics};
use crate::validator::{self, ExpectedSchema};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub attempt_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub distractor_count: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(60),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            distractor_count: validator::DEFAULT_DISTRACTOR_COUNT,
        }
    }
}

impl RetryConfig {
    /// Pause after failed attempt `attempt` (1-based): `min(base * 2^(attempt-1), max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub enum RunError {
    Exhausted(Box<GenerationFailure>),
    Cancelled(CancelReason),
}

/// The attempts made for one request and how the run ended.
#[derive(Debug)]
pub struct RunReport {
    pub attempts: Vec<GenerationAttempt>,
    pub result: Result<ValidatedBatch, RunError>,
}

/// Result of a single attempt, before it is stamped into the log.
struct Step {
    outcome: AttemptOutcome,
    raw_output: Option<String>,
    error: Option<String>,
    batch: Option<ValidatedBatch>,
    /// Set when the breaker refused the call.
    rejected_for: Option<Duration>,
}

impl Step {
    fn failed(outcome: AttemptOutcome, raw_output: Option<String>, error: String) -> Self {
        Self {
            outcome,
            raw_output,
            error: Some(error),
            batch: None,
            rejected_for: None,
        }
    }
}

/// Drives the attempts for one request. Holds no per-request state, so one
/// instance serves every request.
pub struct Orchestrator {
    backend: Arc<dyn Backend>,
    breaker: Arc<CircuitBreaker>,
    taxonomy: Arc<Taxonomy>,
    config: RetryConfig,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        breaker: Arc<CircuitBreaker>,
        taxonomy: Arc<Taxonomy>,
        config: RetryConfig,
    ) -> Self {
        Self {
            backend,
            breaker,
            taxonomy,
            config,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Make up to `max_attempts` attempts. Never makes more than
    /// `max_attempts` backend calls.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        max_attempts: u32,
        cancel: &CancelToken,
    ) -> RunReport {
        let schema = ExpectedSchema::for_request(request, self.config.distractor_count);
        let spec = PromptSpec::new(request, &self.taxonomy, self.config.distractor_count);
        let mut attempts: Vec<GenerationAttempt> = Vec::new();
        let mut feedback: Option<Feedback> = None;
        let mut rejected_for = None;

        for n in 1..=max_attempts.max(1) {
            if n > 1 {
                let delay = self.config.backoff(n - 1);
                if !delay.is_zero() {
                    debug!(attempt = n, delay_ms = delay.as_millis() as u64, "backing off");
                    tokio::select! {
                        reason = cancel.cancelled() => return cancelled(attempts, reason),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
            if let Some(reason) = cancel.reason() {
                return cancelled(attempts, reason);
            }

            let strictness = Strictness::for_attempt(n);
            let started_at = Utc::now();
            let started = Instant::now();

            let step = match self
                .attempt(&spec, &schema, strictness, feedback.as_ref(), cancel)
                .await
            {
                Ok(step) => step,
                Err(reason) => return cancelled(attempts, reason),
            };

            let attempt = GenerationAttempt {
                attempt_number: n,
                prompt_strictness: strictness,
                started_at,
                duration_ms: started.elapsed().as_millis() as u64,
                raw_output: step.raw_output.clone(),
                outcome: step.outcome,
                error: step.error.clone(),
            };
            generation::record_attempt(&Span::current(), &attempt);
            metrics::generation_attempts().add(
                1,
                &[
                    KeyValue::new("kind", request.kind().to_string()),
                    KeyValue::new("outcome", attempt.outcome.to_string()),
                    KeyValue::new("strictness", strictness.to_string()),
                ],
            );
            attempts.push(attempt);
            rejected_for = step.rejected_for;

            if let Some(mut batch) = step.batch {
                batch.attempts = n;
                for correction in &batch.corrections {
                    metrics::term_corrections()
                        .add(1, &[KeyValue::new("level", correction.level.as_str())]);
                }
                return RunReport {
                    attempts,
                    result: Ok(batch),
                };
            }

            if let Some(error) = step.error {
                warn!(
                    attempt = n,
                    max_attempts,
                    outcome = %step.outcome,
                    %error,
                    "generation attempt failed"
                );
                if !step.outcome.is_transient() {
                    feedback = Some(Feedback {
                        error,
                        raw_output: step.raw_output,
                    });
                }
            }
        }

        let failure = GenerationFailure::from_attempts(
            request.id(),
            attempts.clone(),
            rejected_for,
            self.config.attempt_timeout,
        );
        RunReport {
            attempts,
            result: Err(RunError::Exhausted(Box::new(failure))),
        }
    }

    async fn attempt(
        &self,
        spec: &PromptSpec,
        schema: &ExpectedSchema,
        strictness: Strictness,
        feedback: Option<&Feedback>,
        cancel: &CancelToken,
    ) -> Result<Step, CancelReason> {
        if let CallPermit::Rejected { retry_after } = self.breaker.allow_call() {
            let mut step = Step::failed(
                AttemptOutcome::TransientError,
                None,
                format!("circuit breaker '{}' is open", self.breaker.name()),
            );
            step.rejected_for = Some(retry_after);
            return Ok(step);
        }

        let prompt = prompt::render(spec, strictness, feedback);
        let timeout = self.config.attempt_timeout;
        let call = tokio::time::timeout(timeout, self.backend.send(&prompt, timeout));

        let sent = tokio::select! {
            biased;
            reason = cancel.cancelled() => {
                self.breaker.abandon();
                return Err(reason);
            }
            sent = call => sent,
        };

        let raw = match sent {
            Ok(Ok(raw)) => {
                self.breaker.record_result(true);
                raw
            }
            Ok(Err(BackendError::Timeout)) | Err(_) => {
                self.breaker.record_result(false);
                return Ok(Step::failed(
                    AttemptOutcome::Timeout,
                    None,
                    format!("backend did not answer within {}s", timeout.as_secs_f64()),
                ));
            }
            Ok(Err(e @ BackendError::Connection(_))) => {
                self.breaker.record_result(false);
                return Ok(Step::failed(AttemptOutcome::TransientError, None, e.to_string()));
            }
        };

        let payload = match parser::parse(&raw) {
            Ok(payload) => payload,
            Err(e) => {
                return Ok(Step::failed(
                    AttemptOutcome::ParseError,
                    Some(e.raw),
                    format!("parse error: {}", e.reason),
                ));
            }
        };

        match validator::validate(&payload, schema, &self.taxonomy) {
            Ok(batch) => Ok(Step {
                outcome: AttemptOutcome::Success,
                raw_output: Some(raw),
                error: None,
                batch: Some(batch),
                rejected_for: None,
            }),
            Err(e) => Ok(Step::failed(
                AttemptOutcome::ValidationError,
                Some(raw),
                format!("validation error: {e}"),
            )),
        }
    }
}

fn cancelled(attempts: Vec<GenerationAttempt>, reason: CancelReason) -> RunReport {
    RunReport {
        attempts,
        result: Err(RunError::Cancelled(reason)),
    }
}
