//! Circuit breaker guarding the generation backend.
//!
//! One instance is shared by every request that talks to the same backend.
//! All state lives in a single mutex-guarded cell and changes only through
//! [`CircuitBreaker::allow_call`], [`CircuitBreaker::record_result`],
//! [`CircuitBreaker::abandon`] and [`CircuitBreaker::reset`].
//!
//! ```text
//! Closed   --(failure_threshold consecutive failures)--> Open
//! Open     --(call attempted after cooldown)-----------> HalfOpen
//! HalfOpen --(half_open_success_threshold successes)---> Closed
//! HalfOpen --(any failure)------------------------------> Open
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::telemetry::metrics;

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u32,
    /// Time an open breaker waits before letting a probe through.
    pub cooldown: Duration,
    /// Probe successes needed to close a half-open breaker. Also caps the
    /// number of probes in flight at once.
    pub half_open_success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            half_open_success_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

/// Answer to "may I call the backend now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPermit {
    Allowed,
    Rejected { retry_after: Duration },
}

impl CallPermit {
    pub fn is_allowed(self) -> bool {
        matches!(self, CallPermit::Allowed)
    }
}

/// Point-in-time view of the breaker, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_in_flight: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
            opened_at: inner.opened_at,
        }
    }

    /// Must be called before every backend request.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open here;
    /// there is no background timer.
    pub fn allow_call(&self) -> CallPermit {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => CallPermit::Allowed,
            CircuitState::Open => {
                let remaining = self.remaining(&inner, now);
                if remaining.is_zero() {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 1;
                    CallPermit::Allowed
                } else {
                    CallPermit::Rejected {
                        retry_after: remaining,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_success_threshold.max(1) {
                    inner.half_open_in_flight += 1;
                    CallPermit::Allowed
                } else {
                    CallPermit::Rejected {
                        retry_after: Duration::ZERO,
                    }
                }
            }
        }
    }

    /// Report how an allowed call ended. Timeouts count as failures.
    pub fn record_result(&self, success: bool) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match (inner.state, success) {
            (CircuitState::Closed, true) => inner.consecutive_failures = 0,
            (CircuitState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    error!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                    self.open(&mut inner, now);
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_success_threshold {
                    info!(breaker = %self.name, "circuit breaker closed (recovered)");
                    self.close(&mut inner);
                }
            }
            (CircuitState::HalfOpen, false) => {
                inner.consecutive_failures += 1;
                error!(breaker = %self.name, "probe failed, circuit breaker reopened");
                self.open(&mut inner, now);
            }
            // Late result from a call allowed before the breaker opened.
            (CircuitState::Open, false) => inner.consecutive_failures += 1,
            (CircuitState::Open, true) => {}
        }
    }

    /// Release a half-open probe slot for a call that was abandoned before it
    /// produced a result.
    pub fn abandon(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Time left before an open breaker admits a probe. Zero unless open.
    pub fn remaining_cooldown(&self) -> Duration {
        let now = self.clock.now();
        let inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            self.remaining(&inner, now)
        } else {
            Duration::ZERO
        }
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!(breaker = %self.name, "circuit breaker manually reset");
        self.close(&mut inner);
    }

    fn remaining(&self, inner: &Inner, now: DateTime<Utc>) -> Duration {
        let Some(opened_at) = inner.opened_at else {
            return Duration::ZERO;
        };
        let cooldown = TimeDelta::from_std(self.config.cooldown).unwrap_or(TimeDelta::MAX);
        match opened_at.checked_add_signed(cooldown) {
            Some(until) => (until - now).to_std().unwrap_or(Duration::ZERO),
            None => self.config.cooldown,
        }
    }

    fn open(&self, inner: &mut Inner, now: DateTime<Utc>) {
        self.transition(inner, CircuitState::Open);
        inner.opened_at = Some(now);
        inner.half_open_successes = 0;
        inner.half_open_in_flight = 0;
    }

    fn close(&self, inner: &mut Inner) {
        self.transition(inner, CircuitState::Closed);
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.half_open_in_flight = 0;
        inner.opened_at = None;
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        if from != to {
            info!(breaker = %self.name, %from, %to, "breaker_transition");
            metrics::breaker_transitions().add(
                1,
                &[
                    KeyValue::new("breaker", self.name.clone()),
                    KeyValue::new("from", from.to_string()),
                    KeyValue::new("to", to.to_string()),
                ],
            );
        }
    }
}
