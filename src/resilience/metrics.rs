//! Circuit breaker metrics

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters tracked by a [`CircuitBreaker`](crate::resilience::CircuitBreaker)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub current_state: CircuitState,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    /// Longest failure streak seen
    pub max_consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self {
            current_state: CircuitState::Closed,
            total_successes: 0,
            total_failures: 0,
            consecutive_failures: 0,
            max_consecutive_failures: 0,
            last_failure_at: None,
            opened_at: None,
        }
    }
}

impl CircuitBreakerMetrics {
    pub(crate) fn record_success(&mut self) {
        self.total_successes += 1;
    }

    pub(crate) fn record_failure(&mut self, streak: u32) {
        self.total_failures += 1;
        self.max_consecutive_failures = self.max_consecutive_failures.max(streak);
        self.last_failure_at = Some(Utc::now());
    }
}
