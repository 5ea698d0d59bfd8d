//! Text-generation backends.
//!
//! The engine only needs "send a prompt, get text back, or an error". That
//! contract is the [`Backend`] trait; [`AnthropicBackend`] implements it on
//! top of rig-core's Anthropic provider.
//!
//! # Example
//! ```no_run
//! use instruct_engine::llm::{AnthropicBackend, Backend};
//! use secrecy::SecretString;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let key = SecretString::from("sk-ant-...");
//! let backend = AnthropicBackend::new(&key, "claude-sonnet-4-20250514")?;
//! let text = backend.send("Say hi", Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use secrecy::{ExposeSecret, SecretString};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{Instrument, debug, warn};

use crate::config::secrets::redacted_prefix;
use crate::error::{Error, Result};
use crate::telemetry::{genai, metrics};

pub const PROVIDER: &str = "anthropic";
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Why a backend call produced no text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend call timed out")]
    Timeout,

    #[error("backend connection failed: {0}")]
    Connection(String),
}

/// An opaque text generator.
///
/// Implementations must not retry internally; the retry orchestrator owns
/// retries and needs to see every failure.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Model or service name, for logs.
    fn name(&self) -> &str;

    async fn send(&self, prompt: &str, timeout: Duration) -> std::result::Result<String, BackendError>;
}

/// Create an Anthropic client from a secret API key.
///
/// # Errors
/// Returns an error if the underlying HTTP client cannot be constructed.
pub fn anthropic_client(api_key: &SecretString) -> Result<rig::providers::anthropic::Client> {
    rig::providers::anthropic::Client::new(api_key.expose_secret())
        .map_err(|e| Error::Config(format!("failed to build Anthropic client: {e}")))
}

/// Claude via rig-core.
pub struct AnthropicBackend {
    client: rig::providers::anthropic::Client,
    model: String,
    max_tokens: u64,
}

impl AnthropicBackend {
    pub fn new(api_key: &SecretString, model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        let client = anthropic_client(api_key)?;
        debug!(key = %redacted_prefix(api_key), %model, "anthropic backend ready");
        Ok(Self {
            client,
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn send(&self, prompt: &str, timeout: Duration) -> std::result::Result<String, BackendError> {
        let span = genai::start_chat_span(&self.model, PROVIDER);
        genai::record_prompt(&span, prompt.chars().count(), self.max_tokens);

        let agent = self
            .client
            .agent(&self.model)
            .max_tokens(self.max_tokens)
            .build();

        let started = Instant::now();
        let result = tokio::time::timeout(timeout, agent.prompt(prompt))
            .instrument(span.clone())
            .await;
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[opentelemetry::KeyValue::new("operation", "backend_call")],
        );

        match result {
            Ok(Ok(text)) => {
                genai::record_completion(&span, text.chars().count());
                Ok(text)
            }
            Ok(Err(e)) => {
                genai::record_error(&span, "connection");
                warn!(parent: &span, error = %e, "backend call failed");
                Err(BackendError::Connection(e.to_string()))
            }
            Err(_) => {
                genai::record_error(&span, "timeout");
                Err(BackendError::Timeout)
            }
        }
    }
}
