// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Per-service circuit breaker.
//!
//! Prevents cascading failures by rejecting calls to a failing service
//! until a recovery window elapses, then probing with a bounded number of
//! half-open attempts. The half-open to closed transition requires an
//! observed success, never a timer.

use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    /// Normal operation.
    Closed,
    /// Failing; rejecting requests until the recovery timeout elapses.
    Open,
    /// Probing whether the service recovered.
    HalfOpen,
}

struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_attempts: u32,
}

/// Circuit breaker for one service key. Counter updates are synchronised
/// so concurrent successes and failures never lose updates.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_attempts: 0,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Whether a call may proceed. Transitions open breakers to half-open
    /// once the recovery timeout has elapsed; while half-open, counts the
    /// probe against the attempt budget.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => {
                let recovered = inner
                    .last_failure
                    .map_or(false, |at| at.elapsed() > self.config.recovery_timeout);
                if recovered {
                    inner.state = CircuitBreakerState::HalfOpen;
                    inner.half_open_attempts = 0;
                    inner.half_open_attempts += 1;
                    true
                } else {
                    false
                }
            }
            CircuitBreakerState::HalfOpen => {
                if inner.half_open_attempts < self.config.half_open_max_attempts {
                    inner.half_open_attempts += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitBreakerState::HalfOpen => {
                inner.state = CircuitBreakerState::Closed;
                inner.failure_count = 0;
                inner.half_open_attempts = 0;
            }
            CircuitBreakerState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            CircuitBreakerState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitBreakerState::HalfOpen => {
                inner.state = CircuitBreakerState::Open;
                inner.half_open_attempts = 0;
            }
            CircuitBreakerState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitBreakerState::Open;
                }
            }
            CircuitBreakerState::Open => {}
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish_non_exhaustive()
    }
}
