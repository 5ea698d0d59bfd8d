mod common;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use common::{
    Reply, ScriptedBackend, breaker_config, coordinator, fast_config, objectives_json,
    objectives_payload,
};
use instruct_engine::breaker::CircuitState;
use instruct_engine::cache::{Cache, CacheEntry, CacheKey, CacheStore, MemoryCache};
use instruct_engine::clock::ManualClock;
use instruct_engine::config::EngineConfig;
use instruct_engine::engine::{CancelToken, Coordinator, FailureReason, GenerateError};
use instruct_engine::error::{Error, Result};
use instruct_engine::model::{AttemptOutcome, CacheStatus, GenerationRequest};
use instruct_engine::taxonomy::Taxonomy;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn loops() -> GenerationRequest {
    GenerationRequest::objectives("Loops", "beginners", 5)
}

fn coordinator_with_clock(
    backend: Arc<ScriptedBackend>,
    config: EngineConfig,
) -> (Coordinator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let cache = Cache::with_clock(Arc::new(MemoryCache::new()), config.cache_ttl, clock.clone());
    let coordinator = Coordinator::new(backend, cache, Arc::new(Taxonomy::bloom()), config);
    (coordinator, clock)
}

// ---------------------------------------------------------------------------
// Happy path and cache
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_generates_and_caches() {
    let backend = ScriptedBackend::new(vec![Reply::Text(objectives_json("Loops", 5))]);
    let coordinator = coordinator(backend.clone(), fast_config());
    let request = loops();

    let batch = coordinator.generate(&request, &CancelToken::new()).await.unwrap();
    assert_eq!(batch.items.len(), 5);
    assert_eq!(batch.cache_status, CacheStatus::Miss);
    assert_eq!(batch.attempts, 1);

    let cached = coordinator
        .cache()
        .get(&CacheKey::derive(&request))
        .await
        .unwrap();
    assert!(cached.is_some());

    let log = coordinator.last_attempt_log(&request.id());
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].outcome, AttemptOutcome::Success);
}

#[tokio::test]
async fn identical_request_is_served_from_cache() {
    let backend = ScriptedBackend::new(vec![Reply::Text(objectives_json("Loops", 5))]);
    let coordinator = coordinator(backend.clone(), fast_config());

    let first = coordinator.generate(&loops(), &CancelToken::new()).await.unwrap();
    let again = GenerationRequest::objectives("  LOOPS ", "Beginners", 5);
    let second = coordinator.generate(&again, &CancelToken::new()).await.unwrap();

    assert_eq!(backend.calls(), 1);
    assert_eq!(second.cache_status, CacheStatus::Hit);
    assert_eq!(second.items, first.items);
    assert!(coordinator.last_attempt_log(&again.id()).is_empty());
    assert_eq!(coordinator.breaker().snapshot().consecutive_failures, 0);
}

#[tokio::test]
async fn forced_bypass_regenerates() {
    let backend = ScriptedBackend::new(vec![
        Reply::Text(objectives_json("Loops", 5)),
        Reply::Text(objectives_json("Loops", 5)),
    ]);
    let coordinator = coordinator(backend.clone(), fast_config());

    coordinator.generate(&loops(), &CancelToken::new()).await.unwrap();
    let batch = coordinator
        .generate(&loops().force_cache_bypass(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(backend.calls(), 2);
    assert_eq!(batch.cache_status, CacheStatus::Miss);
}

#[tokio::test]
async fn corrected_batches_are_cached_with_their_corrections() {
    let mut payload = objectives_payload("Loops", 5);
    payload["objectives"][0]["verb"] = json!("zap");
    let backend = ScriptedBackend::new(vec![Reply::Text(payload.to_string())]);
    let coordinator = coordinator(backend.clone(), fast_config());

    let fresh = coordinator.generate(&loops(), &CancelToken::new()).await.unwrap();
    assert!(fresh.has_corrections());
    assert!(fresh.items[0].corrected);

    let cached = coordinator.generate(&loops(), &CancelToken::new()).await.unwrap();
    assert_eq!(cached.cache_status, CacheStatus::Hit);
    assert_eq!(cached.corrections, fresh.corrections);
    assert_eq!(backend.calls(), 1);
}

// ---------------------------------------------------------------------------
// Failure paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_output_on_every_attempt_fails() {
    let backend = ScriptedBackend::with_fallback(vec![], Reply::Text("{ not json".into()));
    let coordinator = coordinator(backend.clone(), fast_config());
    let request = loops();

    let err = coordinator.generate(&request, &CancelToken::new()).await.unwrap_err();
    let failure = err.failure().expect("structured failure");
    assert_eq!(failure.attempts, 3);
    assert_eq!(failure.final_outcome, AttemptOutcome::ParseError);
    assert_eq!(failure.reason, FailureReason::InvalidOutput);
    assert!(failure.stale.is_none());
    assert_eq!(backend.calls(), 3);
    assert_eq!(coordinator.last_attempt_log(&request.id()).len(), 3);
}

#[tokio::test]
async fn stale_entry_served_when_backend_is_down() {
    let backend = ScriptedBackend::new(vec![Reply::Text(objectives_json("Loops", 5))]);
    let (coordinator, clock) = coordinator_with_clock(backend.clone(), fast_config());

    coordinator.generate(&loops(), &CancelToken::new()).await.unwrap();
    clock.advance(TimeDelta::days(8));

    let batch = coordinator.generate(&loops(), &CancelToken::new()).await.unwrap();
    assert_eq!(batch.cache_status, CacheStatus::Stale);
    assert!(batch.is_degraded());
    assert_eq!(batch.items.len(), 5);
    assert_eq!(backend.calls(), 4);
}

#[tokio::test]
async fn stale_entry_attached_when_output_is_invalid() {
    let backend = ScriptedBackend::with_fallback(
        vec![Reply::Text(objectives_json("Loops", 5))],
        Reply::Text("still not json".into()),
    );
    let (coordinator, clock) = coordinator_with_clock(backend, fast_config());

    coordinator.generate(&loops(), &CancelToken::new()).await.unwrap();
    clock.advance(TimeDelta::days(8));

    let err = coordinator.generate(&loops(), &CancelToken::new()).await.unwrap_err();
    let failure = err.failure().expect("structured failure");
    assert_eq!(failure.reason, FailureReason::InvalidOutput);
    let stale = failure.stale.as_ref().expect("stale batch attached");
    assert!(stale.is_degraded());
}

#[tokio::test]
async fn backend_down_without_cache_fails() {
    let backend = ScriptedBackend::new(vec![]);
    let coordinator = coordinator(backend, fast_config());

    let err = coordinator.generate(&loops(), &CancelToken::new()).await.unwrap_err();
    let failure = err.failure().expect("structured failure");
    assert!(failure.is_backend_unavailable());
    assert_eq!(failure.code.as_str(), "SERVICE_UNAVAILABLE");
    assert!(!failure.suggestion.is_empty());
}

#[tokio::test]
async fn breaker_short_circuit_then_half_open_probe_succeeds() {
    let backend = ScriptedBackend::new(vec![Reply::Text(objectives_json("Loops", 5))]);
    let config = EngineConfig {
        retry_base_delay: Duration::from_millis(300),
        retry_max_delay: Duration::from_millis(300),
        breaker: breaker_config(5, Duration::from_millis(200), 3),
        ..fast_config()
    };
    let coordinator = coordinator(backend.clone(), config);

    // Five consecutive transient failures from earlier requests.
    for _ in 0..5 {
        assert!(coordinator.breaker().allow_call().is_allowed());
        coordinator.breaker().record_result(false);
    }
    assert_eq!(coordinator.breaker().state(), CircuitState::Open);

    let request = loops();
    let batch = coordinator.generate(&request, &CancelToken::new()).await.unwrap();
    assert_eq!(batch.attempts, 2);
    assert_eq!(backend.calls(), 1);

    let log = coordinator.last_attempt_log(&request.id());
    assert_eq!(log[0].outcome, AttemptOutcome::TransientError);
    assert!(log[0].raw_output.is_none());
    assert_eq!(log[1].outcome, AttemptOutcome::Success);
    assert_eq!(coordinator.breaker().state(), CircuitState::HalfOpen);
}

#[tokio::test]
async fn open_breaker_failure_reports_cooldown() {
    let backend = ScriptedBackend::new(vec![]);
    let config = EngineConfig {
        breaker: breaker_config(1, Duration::from_secs(600), 1),
        ..fast_config()
    };
    let coordinator = coordinator(backend.clone(), config);

    let err = coordinator.generate(&loops(), &CancelToken::new()).await.unwrap_err();
    let failure = err.failure().expect("structured failure");
    assert_eq!(failure.code.as_str(), "CIRCUIT_BREAKER_OPEN");
    assert!(failure.retry_after.is_some());
    assert_eq!(backend.calls(), 1);
}

// ---------------------------------------------------------------------------
// Requests, cancellation, concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn out_of_bounds_requests_are_rejected_up_front() {
    let backend = ScriptedBackend::new(vec![]);
    let coordinator = coordinator(backend.clone(), fast_config());

    let empty_topic = GenerationRequest::objectives("   ", "beginners", 5);
    let too_many = GenerationRequest::quiz("Explain loops", "beginners", 11);
    let too_long = GenerationRequest::objectives("x".repeat(201), "beginners", 5);

    for request in [empty_topic, too_many, too_long] {
        let err = coordinator.generate(&request, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, GenerateError::InvalidRequest(_)));
    }
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn cancellation_is_distinct_from_failure() {
    let backend = ScriptedBackend::new(vec![Reply::Text(objectives_json("Loops", 5))]);
    let coordinator = coordinator(backend.clone(), fast_config());
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = coordinator.generate(&loops(), &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(err.failure().is_none());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn concurrent_identical_requests_generate_once() {
    let backend = ScriptedBackend::new(vec![Reply::Slow(
        Duration::from_millis(50),
        objectives_json("Loops", 5),
    )]);
    let coordinator = Arc::new(coordinator(backend.clone(), fast_config()));

    let a = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.generate(&loops(), &CancelToken::new()).await })
    };
    let b = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.generate(&loops(), &CancelToken::new()).await })
    };
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!(backend.calls(), 1);
    let mut statuses = vec![a.cache_status, b.cache_status];
    statuses.sort_by_key(|s| *s == CacheStatus::Hit);
    assert_eq!(statuses, vec![CacheStatus::Miss, CacheStatus::Hit]);
}

#[tokio::test]
async fn trailing_log_is_bounded() {
    let backend = ScriptedBackend::with_fallback(vec![], Reply::Text("nope".into()));
    let config = EngineConfig {
        trailing_log_capacity: 1,
        objectives_max_attempts: 1,
        ..fast_config()
    };
    let coordinator = coordinator(backend, config);

    let first = loops();
    let second = GenerationRequest::objectives("Recursion", "beginners", 5);
    let _ = coordinator.generate(&first, &CancelToken::new()).await;
    let _ = coordinator.generate(&second, &CancelToken::new()).await;

    assert!(coordinator.last_attempt_log(&first.id()).is_empty());
    assert_eq!(coordinator.last_attempt_log(&second.id()).len(), 1);
}

// ---------------------------------------------------------------------------
// Cache store errors
// ---------------------------------------------------------------------------

struct BrokenStore;

#[async_trait]
impl CacheStore for BrokenStore {
    async fn load(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
        Err(Error::Other("store offline".into()))
    }

    async fn store(&self, _entry: CacheEntry) -> Result<()> {
        Err(Error::Other("store offline".into()))
    }

    async fn remove(&self, _key: &CacheKey) -> Result<bool> {
        Err(Error::Other("store offline".into()))
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
        Err(Error::Other("store offline".into()))
    }
}

#[tokio::test]
async fn cache_errors_do_not_fail_generation() {
    let backend = ScriptedBackend::new(vec![Reply::Text(objectives_json("Loops", 5))]);
    let config = fast_config();
    let coordinator = Coordinator::new(
        backend,
        Cache::new(Arc::new(BrokenStore), config.cache_ttl),
        Arc::new(Taxonomy::bloom()),
        config,
    );

    let batch = coordinator.generate(&loops(), &CancelToken::new()).await.unwrap();
    assert_eq!(batch.cache_status, CacheStatus::Miss);
}
