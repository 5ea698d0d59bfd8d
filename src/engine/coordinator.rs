//! The public entry point: cache, breaker, retries, cache write.

use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, info, warn};

use super::cancel::{CancelReason, CancelToken};
use super::diagnostics::AttemptLogBook;
use super::flight::InFlight;
use super::retry::{Orchestrator, RetryConfig, RunError};
use super::GenerateError;
use crate::breaker::CircuitBreaker;
use crate::cache::{Cache, CacheKey};
use crate::config::EngineConfig;
use crate::llm::Backend;
use crate::model::{
    CacheStatus, FORCE_CACHE_BYPASS, GenerationAttempt, GenerationRequest, RequestId,
    ValidatedBatch,
};
use crate::taxonomy::Taxonomy;
use crate::telemetry::{generation, metrics};

/// Composes cache, breaker and retry orchestrator behind [`Coordinator::generate`].
///
/// Share one coordinator (behind an `Arc`) across all callers; the breaker it
/// holds is meant to see every request to its backend.
pub struct Coordinator {
    orchestrator: Orchestrator,
    breaker: Arc<CircuitBreaker>,
    cache: Cache,
    taxonomy: Arc<Taxonomy>,
    config: EngineConfig,
    logs: AttemptLogBook,
    in_flight: InFlight,
}

impl Coordinator {
    /// Build a coordinator with its own breaker, named after the backend.
    pub fn new(
        backend: Arc<dyn Backend>,
        cache: Cache,
        taxonomy: Arc<Taxonomy>,
        config: EngineConfig,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(backend.name(), config.breaker.clone()));
        Self::with_breaker(backend, breaker, cache, taxonomy, config)
    }

    /// Build a coordinator around an existing breaker.
    pub fn with_breaker(
        backend: Arc<dyn Backend>,
        breaker: Arc<CircuitBreaker>,
        cache: Cache,
        taxonomy: Arc<Taxonomy>,
        config: EngineConfig,
    ) -> Self {
        let retry = RetryConfig {
            attempt_timeout: config.attempt_timeout,
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
            distractor_count: config.distractor_count,
        };
        Self {
            orchestrator: Orchestrator::new(backend, Arc::clone(&breaker), Arc::clone(&taxonomy), retry),
            breaker,
            cache,
            taxonomy,
            logs: AttemptLogBook::new(config.trailing_log_capacity),
            in_flight: InFlight::new(),
            config,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Attempts made for a finished request, oldest first.
    ///
    /// Empty for unknown requests, cache hits, and requests that have aged out
    /// of the trailing log.
    pub fn last_attempt_log(&self, request_id: &RequestId) -> Vec<GenerationAttempt> {
        self.logs.get(request_id)
    }

    /// Produce a validated batch for `request`.
    ///
    /// The returned batch's `cache_status` says whether it was generated
    /// (`Miss`), served fresh from cache (`Hit`), or served expired because the
    /// backend is unavailable (`Stale`).
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<ValidatedBatch, GenerateError> {
        let kind = request.kind();
        if let Err(reason) = request.check() {
            record_request(kind.to_string(), "invalid");
            return Err(GenerateError::InvalidRequest(reason));
        }

        let key = CacheKey::derive(request);
        let span = generation::start_generation_span(kind, &request.id(), key.short());
        let started = Instant::now();

        let result = self
            .generate_keyed(request, &key, cancel)
            .instrument(span.clone())
            .await;

        let label = match &result {
            Ok(batch) => match batch.cache_status {
                CacheStatus::Hit => "cached",
                CacheStatus::Miss => "fresh",
                CacheStatus::Stale => "stale",
            },
            Err(GenerateError::Cancelled { .. }) => "cancelled",
            Err(GenerateError::InvalidRequest(_)) => "invalid",
            Err(GenerateError::Failed(_)) => "failed",
        };
        let attempts = match &result {
            Ok(batch) if batch.cache_status == CacheStatus::Miss => batch.attempts,
            Err(GenerateError::Failed(failure)) => failure.attempts,
            Err(GenerateError::Cancelled { attempts, .. }) => *attempts,
            _ => 0,
        };
        generation::record_finish(&span, label, attempts);
        record_request(kind.to_string(), label);
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "generate")],
        );

        result
    }

    async fn generate_keyed(
        &self,
        request: &GenerationRequest,
        key: &CacheKey,
        cancel: &CancelToken,
    ) -> Result<ValidatedBatch, GenerateError> {
        let cancelled = |reason: CancelReason, attempts: u32| GenerateError::Cancelled {
            request_id: request.id(),
            reason,
            attempts,
        };

        if let Some(reason) = cancel.reason() {
            return Err(cancelled(reason, 0));
        }

        let bypass = request.flag(FORCE_CACHE_BYPASS);
        if !bypass {
            if let Some(batch) = self.fresh(key).await {
                return Ok(batch);
            }
        }

        let _flight = tokio::select! {
            reason = cancel.cancelled() => return Err(cancelled(reason, 0)),
            guard = self.in_flight.acquire(key) => guard,
        };

        // Another caller may have filled the entry while we waited.
        if !bypass {
            if let Some(batch) = self.fresh(key).await {
                return Ok(batch);
            }
        }

        let max_attempts = self.config.max_attempts(request.kind());
        let report = self.orchestrator.run(request, max_attempts, cancel).await;
        self.logs.record(request.id(), report.attempts.clone());

        match report.result {
            Ok(mut batch) => {
                batch.cache_status = CacheStatus::Miss;
                self.store(key, &batch).await;
                info!(
                    items = batch.items.len(),
                    corrections = batch.corrections.len(),
                    attempts = batch.attempts,
                    "generation succeeded"
                );
                Ok(batch)
            }
            Err(RunError::Cancelled(reason)) => {
                info!(%reason, "generation cancelled");
                Err(cancelled(reason, report.attempts.len() as u32))
            }
            Err(RunError::Exhausted(mut failure)) => {
                let stale = self.any_entry(key).await;
                match stale {
                    Some(mut batch) if failure.is_backend_unavailable() => {
                        warn!(
                            code = %failure.code,
                            generated_at = %batch.generated_at,
                            "backend unavailable, serving stale cached result"
                        );
                        batch.cache_status = CacheStatus::Stale;
                        Ok(batch)
                    }
                    stale => {
                        warn!(
                            code = %failure.code,
                            attempts = failure.attempts,
                            final_outcome = %failure.final_outcome,
                            "generation failed"
                        );
                        failure.stale = stale.map(|mut batch| {
                            batch.cache_status = CacheStatus::Stale;
                            Box::new(batch)
                        });
                        Err(GenerateError::Failed(failure))
                    }
                }
            }
        }
    }

    /// Fresh cached batch, marked as a hit. Store errors count as a miss.
    async fn fresh(&self, key: &CacheKey) -> Option<ValidatedBatch> {
        let entry = match self.cache.get(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(error = %e, "cache read failed, treating as miss");
                return None;
            }
        };
        let mut batch = decode(key, entry.payload)?;
        batch.cache_status = CacheStatus::Hit;
        Some(batch)
    }

    /// Cached batch regardless of expiry.
    async fn any_entry(&self, key: &CacheKey) -> Option<ValidatedBatch> {
        match self.cache.get_including_expired(key).await {
            Ok(entry) => decode(key, entry?.payload),
            Err(e) => {
                warn!(error = %e, "cache read failed while looking for a stale entry");
                None
            }
        }
    }

    async fn store(&self, key: &CacheKey, batch: &ValidatedBatch) {
        let payload = match serde_json::to_value(batch) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "could not serialize batch for the cache");
                return;
            }
        };
        if let Err(e) = self.cache.put_default(key.clone(), payload).await {
            warn!(error = %e, "cache write failed");
        }
    }
}

fn decode(key: &CacheKey, payload: serde_json::Value) -> Option<ValidatedBatch> {
    match serde_json::from_value(payload) {
        Ok(batch) => Some(batch),
        Err(e) => {
            warn!(key = key.short(), error = %e, "ignoring undecodable cache entry");
            None
        }
    }
}

fn record_request(kind: String, result: &'static str) {
    metrics::generation_requests().add(
        1,
        &[KeyValue::new("kind", kind), KeyValue::new("result", result)],
    );
}
