//! Shared test doubles and fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use instruct_engine::breaker::BreakerConfig;
use instruct_engine::cache::Cache;
use instruct_engine::config::EngineConfig;
use instruct_engine::engine::Coordinator;
use instruct_engine::llm::{Backend, BackendError};
use instruct_engine::taxonomy::Taxonomy;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted backend reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Timeout,
    Connection,
    /// Answer after a delay.
    Slow(Duration, String),
    /// Never answer.
    Hang,
}

/// Backend that plays back a fixed list of replies, then a fallback.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Reply>) -> Arc<Self> {
        Self::with_fallback(script, Reply::Connection)
    }

    pub fn with_fallback(script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, prompt: &str, _timeout: Duration) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Timeout => Err(BackendError::Timeout),
            Reply::Connection => Err(BackendError::Connection("connection refused".to_string())),
            Reply::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Reply::Hang => {
                std::future::pending::<()>().await;
                Err(BackendError::Timeout)
            }
        }
    }
}

/// Engine settings with no backoff and a short attempt timeout.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        attempt_timeout: Duration::from_secs(5),
        retry_base_delay: Duration::ZERO,
        retry_max_delay: Duration::ZERO,
        ..EngineConfig::default()
    }
}

pub fn breaker_config(failure_threshold: u32, cooldown: Duration, half_open: u32) -> BreakerConfig {
    BreakerConfig {
        failure_threshold,
        cooldown,
        half_open_success_threshold: half_open,
    }
}

pub fn coordinator(backend: Arc<ScriptedBackend>, config: EngineConfig) -> Coordinator {
    Coordinator::new(
        backend,
        Cache::in_memory(config.cache_ttl),
        Arc::new(Taxonomy::bloom()),
        config,
    )
}

const OBJECTIVE_ROWS: [(&str, &str, &str); 6] = [
    ("define", "the core vocabulary of the topic", "Remember"),
    ("explain", "how the main ideas relate to each other", "Understand"),
    ("apply", "the techniques to a worked example", "Apply"),
    ("analyze", "a case study for common mistakes", "Analyze"),
    ("evaluate", "competing approaches against clear criteria", "Evaluate"),
    ("design", "a small project that uses the topic end to end", "Create"),
];

/// Valid objectives payload with `n` items, cycling through the levels.
pub fn objectives_payload(topic: &str, n: usize) -> Value {
    let objectives: Vec<Value> = (0..n)
        .map(|i| {
            let (verb, content, level) = OBJECTIVE_ROWS[i % OBJECTIVE_ROWS.len()];
            json!({
                "id": format!("LO-{:03}", i + 1),
                "verb": verb,
                "content": content,
                "level": level,
            })
        })
        .collect();
    json!({ "topic": topic, "objectives": objectives })
}

pub fn objectives_json(topic: &str, n: usize) -> String {
    objectives_payload(topic, n).to_string()
}

/// One well-formed quiz question.
pub fn question(id: &str, correct: &str, distractors: [&str; 3]) -> Value {
    json!({
        "id": id,
        "stem": format!("Which statement about item {id} is correct?"),
        "correct_answer": correct,
        "distractors": distractors,
        "explanation": "The correct answer follows directly from the definition.",
        "difficulty": "medium",
    })
}

/// Valid quiz payload with `n` questions.
pub fn quiz_payload(n: usize) -> Value {
    let questions: Vec<Value> = (0..n)
        .map(|i| {
            question(
                &format!("Q-{:03}", i + 1),
                &format!("Answer {i}"),
                ["Wrong one", "Wrong two", "Wrong three"],
            )
        })
        .collect();
    json!({ "questions": questions })
}

pub fn quiz_json(n: usize) -> String {
    quiz_payload(n).to_string()
}
