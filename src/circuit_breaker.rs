//! A small generic circuit breaker, generalized from oxicrab's
//! provider-specific breaker (`providers::circuit_breaker`) so the NER
//! detector can reuse the same state machine without
//! depending on the LLM-provider trait.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
}

/// Trips open after `failure_threshold` consecutive failures; a single
/// success while half-open (i.e. after `cooldown` has elapsed) closes it
/// again.
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    cooldown: Duration,
    name: &'static str,
}

/// Returned by [`CircuitBreaker::guard`] — the caller must match on it
/// before attempting the guarded operation.
pub enum Admission {
    Allowed,
    Open,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
            }),
            failure_threshold,
            cooldown,
            name,
        }
    }

    /// Whether a call should be attempted right now.
    pub fn guard(&self) -> Admission {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match guard.state {
            CircuitState::Closed | CircuitState::HalfOpen => Admission::Allowed,
            CircuitState::Open { since } => {
                if since.elapsed() >= self.cooldown {
                    info!(breaker = self.name, "circuit breaker transitioning Open -> HalfOpen");
                    guard.state = CircuitState::HalfOpen;
                    Admission::Allowed
                } else {
                    Admission::Open
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.consecutive_failures = 0;
        if guard.state != CircuitState::Closed {
            info!(breaker = self.name, "circuit breaker transitioning -> Closed");
            guard.state = CircuitState::Closed;
        }
    }

    pub fn record_failure(&self) {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.consecutive_failures += 1;
        let failures = guard.consecutive_failures;
        match guard.state {
            CircuitState::Closed if failures >= self.failure_threshold => {
                warn!(breaker = self.name, failures, "circuit breaker tripped: Closed -> Open");
                guard.state = CircuitState::Open { since: Instant::now() };
            }
            CircuitState::HalfOpen => {
                warn!(breaker = self.name, "circuit breaker probe failed: HalfOpen -> Open");
                guard.state = CircuitState::Open { since: Instant::now() };
            }
            _ => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.guard(), Admission::Open)
    }
}
