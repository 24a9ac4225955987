//! # Fetch Circuit Breaker
//!
//! Consecutive-failure breaker guarding the subscription pull loop. Unlike a
//! classic three-state breaker there is no half-open probe: once the breaker
//! opens, the pull loop halts for good and recovery is a process restart.
//!
//! - **Closed**: last fetch outcome was healthy
//! - **Counting**: one or more consecutive fetch failures, still under threshold
//! - **Open**: failures exceeded the threshold, terminal

use crate::resilience::CircuitBreakerMetrics;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed = 0,
    /// Failures are being counted
    Counting = 1,
    /// Threshold exceeded, the protected loop must stop
    Open = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Counting,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

/// Breaker thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures tolerated; the next one opens the breaker
    pub failure_threshold: u32,
}

/// Consecutive-failure counter with a terminal open state
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state
    state: AtomicU8,

    /// Failures since the last recorded success
    consecutive_failures: AtomicU32,

    config: CircuitBreakerConfig,

    metrics: Mutex<CircuitBreakerMetrics>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            config,
            metrics: Mutex::new(CircuitBreakerMetrics::default()),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether the protected loop must stop
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Record a healthy outcome, resetting the failure counter
    pub fn record_success(&self) {
        if self.is_open() {
            debug!(component = %self.name, "Ignoring success recorded on open circuit");
            return;
        }

        let previous = self.consecutive_failures.swap(0, Ordering::AcqRel);
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.metrics.lock().record_success();

        if previous > 0 {
            info!(
                component = %self.name,
                cleared_failures = previous,
                "✅ Circuit breaker failure counter reset"
            );
        }
    }

    /// Record a failure and return the resulting state
    pub fn record_failure(&self) -> CircuitState {
        if self.is_open() {
            return CircuitState::Open;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        self.metrics.lock().record_failure(failures);

        if failures > self.config.failure_threshold {
            self.state.store(CircuitState::Open as u8, Ordering::Release);
            self.metrics.lock().opened_at = Some(Utc::now());
            error!(
                component = %self.name,
                consecutive_failures = failures,
                failure_threshold = self.config.failure_threshold,
                "🔴 Circuit breaker opened"
            );
            CircuitState::Open
        } else {
            self.state
                .store(CircuitState::Counting as u8, Ordering::Release);
            warn!(
                component = %self.name,
                consecutive_failures = failures,
                failure_threshold = self.config.failure_threshold,
                "⚠️ Circuit breaker recorded failure"
            );
            CircuitState::Counting
        }
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut snapshot = self.metrics.lock().clone();
        snapshot.current_state = self.state();
        snapshot.consecutive_failures = self.consecutive_failures();
        snapshot
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }
}
