//! Consecutive-failure breaker for the live session.
//!
//! Every poll, bankroll lookup and wager submission reports its outcome here.
//! Once `failure_threshold` failures happen in a row the circuit opens and the
//! session ends instead of hammering a dead endpoint.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::LiveError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failure threshold exceeded, session should stop
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailureBreakerConfig {
    /// Number of consecutive failures to trip the circuit
    pub failure_threshold: u32,
}

impl Default for FailureBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
        }
    }
}

#[derive(Debug)]
pub struct FailureBreaker {
    config: FailureBreakerConfig,
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
    last_failure: Mutex<Option<(DateTime<Utc>, String)>>,
}

impl FailureBreaker {
    pub fn new(config: FailureBreakerConfig) -> Self {
        Self {
            config,
            consecutive_failures: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        }
    }

    pub fn with_threshold(failure_threshold: u32) -> Self {
        Self::new(FailureBreakerConfig { failure_threshold })
    }

    pub fn state(&self) -> CircuitState {
        if self.consecutive_failures.load(Ordering::SeqCst) >= self.config.failure_threshold {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn record_success(&self) {
        let prev = self.consecutive_failures.swap(0, Ordering::SeqCst);
        if prev > 0 {
            debug!("Recovered after {} consecutive failures", prev);
        }
    }

    /// Record a failure; returns an error once the circuit is open
    pub fn record_failure(&self, reason: &str) -> Result<(), LiveError> {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        self.total_failures.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_failure.lock() {
            *last = Some((Utc::now(), reason.to_string()));
        }

        warn!(
            "Live failure #{}/{}: {}",
            failures, self.config.failure_threshold, reason
        );

        if failures >= self.config.failure_threshold {
            warn!("Circuit breaker TRIPPED: {} consecutive failures", failures);
            return Err(LiveError::ConsecutiveFailures {
                count: failures,
                threshold: self.config.failure_threshold,
            });
        }
        Ok(())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::SeqCst)
    }

    pub fn last_failure(&self) -> Option<(DateTime<Utc>, String)> {
        self.last_failure.lock().ok().and_then(|last| last.clone())
    }
}
