//! Circuit breaker for calls to unreliable dependencies.
//!
//! Wraps any fallible call. Transient failures (timeouts, connection
//! errors) count toward the trip threshold; permanent failures (the
//! dependency explicitly rejected the request) pass through without
//! touching the circuit. State transitions are logged, never raised.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Errors that can classify themselves as transient or permanent.
/// Only transient failures count toward opening the circuit.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Error surface of a breaker-wrapped call.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Circuit is open; the dependency was not called.
    Open,
    /// The wrapped call itself failed.
    Inner(E),
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    /// Rolling window for counting failures.
    pub failure_window: Duration,
    /// Time to wait in open state before permitting a trial call.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    /// Set while the single half-open trial call is in flight.
    probe_in_flight: bool,
}

/// One breaker instance per dependency client; safe for concurrent use
/// without serializing the wrapped calls themselves.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

enum CallPermit {
    Normal,
    Probe,
    Denied,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: BreakerConfig) -> Self {
        CircuitBreaker {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    /// Whether a call would currently be admitted. Drives degradation
    /// decisions when the breaker guards the pipeline itself.
    pub fn allow_request(&self) -> bool {
        !matches!(self.acquire(), CallPermit::Denied)
    }

    /// Execute `op` under the breaker. Returns `BreakerError::Open`
    /// without calling the dependency when the circuit is open.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        E: Transient,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire();
        if matches!(permit, CallPermit::Denied) {
            return Err(BreakerError::Open);
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                if e.is_transient() {
                    self.record_failure();
                } else {
                    // The dependency answered, just not the way the
                    // caller wanted: the circuit stays healthy.
                    self.record_success();
                }
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Record a transient failure observed outside `call` (used by the
    /// pipeline-level breaker that counts whole-run outcomes).
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();

        if let Some(last) = inner.last_failure {
            if now.duration_since(last) > self.config.failure_window {
                inner.failures = 0;
            }
        }
        inner.failures += 1;
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                log::warn!("circuit '{}' reopened: trial call failed", self.name);
            }
            CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                log::warn!(
                    "circuit '{}' opened after {} failures",
                    self.name,
                    inner.failures
                );
            }
            _ => {}
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            log::info!("circuit '{}' closed", self.name);
        }
        inner.state = CircuitState::Closed;
    }

    fn acquire(&self) -> CallPermit {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => CallPermit::Normal,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    log::info!("circuit '{}' half-open, permitting trial call", self.name);
                    CallPermit::Probe
                } else {
                    CallPermit::Denied
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    CallPermit::Denied
                } else {
                    inner.probe_in_flight = true;
                    CallPermit::Probe
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
