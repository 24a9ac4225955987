//! # Subscription Health
//!
//! Observable state of the subscription pull loop. The loop publishes every
//! transition on a watch channel; health checks read the latest state, and the
//! engine can wait for the terminal `Halted` transition instead of discovering
//! a silent hang.
//!
//! ```text
//! Connected → Fetching → {Delivering, ErrorCounting} → Fetching | Halted
//! ```

use crate::resilience::{CircuitBreaker, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Pull loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Session established, no fetch issued yet
    Connected,
    /// Waiting on a batch fetch
    Fetching,
    /// Batch handed out, waiting for verdicts
    Delivering,
    /// Last fetch failed, counting towards the halt threshold
    ErrorCounting,
    /// Terminal; recovery requires a restart
    Halted,
}

impl SubscriptionState {
    pub fn is_terminal(self) -> bool {
        self == SubscriptionState::Halted
    }

    /// Healthy states are the ones where messages can still flow
    pub fn is_operational(self) -> bool {
        !matches!(self, SubscriptionState::Halted)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SubscriptionState::Connected => "connected",
            SubscriptionState::Fetching => "fetching",
            SubscriptionState::Delivering => "delivering",
            SubscriptionState::ErrorCounting => "error_counting",
            SubscriptionState::Halted => "halted",
        };
        f.write_str(label)
    }
}

/// Point-in-time health snapshot suitable for a health endpoint or log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: SubscriptionState,
    pub operational: bool,
    pub fetch_breaker: CircuitBreakerMetrics,
    pub reported_at: DateTime<Utc>,
}

/// Writer half, owned by the pull loop
#[derive(Debug)]
pub struct HealthPublisher {
    tx: watch::Sender<SubscriptionState>,
}

impl HealthPublisher {
    /// Create a publisher in the `Connected` state and its read handle
    pub fn new(breaker: Arc<CircuitBreaker>) -> (Self, SubscriptionHealth) {
        let (tx, rx) = watch::channel(SubscriptionState::Connected);
        (Self { tx }, SubscriptionHealth { rx, breaker })
    }

    /// Record a transition. Nothing leaves `Halted`.
    pub fn transition(&self, next: SubscriptionState) {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "Subscription state transition");
            *current = next;
            true
        });
    }

    pub fn state(&self) -> SubscriptionState {
        *self.tx.borrow()
    }
}

/// Read handle for health checks
#[derive(Debug, Clone)]
pub struct SubscriptionHealth {
    rx: watch::Receiver<SubscriptionState>,
    breaker: Arc<CircuitBreaker>,
}

impl SubscriptionHealth {
    pub fn state(&self) -> SubscriptionState {
        *self.rx.borrow()
    }

    pub fn is_halted(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn report(&self) -> HealthReport {
        let state = self.state();
        HealthReport {
            state,
            operational: state.is_operational(),
            fetch_breaker: self.breaker.metrics(),
            reported_at: Utc::now(),
        }
    }

    /// Resolve once the pull loop halts. Returns `false` if the loop went away
    /// without halting (closed normally).
    pub async fn wait_for_halt(&self) -> bool {
        let mut rx = self.rx.clone();
        let halted = rx.wait_for(|state| state.is_terminal()).await.is_ok();
        halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitBreakerConfig;

    fn publisher() -> (HealthPublisher, SubscriptionHealth) {
        let breaker = Arc::new(CircuitBreaker::new(
            "fetch",
            CircuitBreakerConfig {
                failure_threshold: 2,
            },
        ));
        HealthPublisher::new(breaker)
    }

    #[test]
    fn test_transitions_are_observable() {
        let (publisher, health) = publisher();
        assert_eq!(health.state(), SubscriptionState::Connected);

        publisher.transition(SubscriptionState::Fetching);
        assert_eq!(health.state(), SubscriptionState::Fetching);

        publisher.transition(SubscriptionState::Delivering);
        assert_eq!(health.state(), SubscriptionState::Delivering);
        assert!(!health.is_halted());
    }

    #[test]
    fn test_halted_is_terminal() {
        let (publisher, health) = publisher();
        publisher.transition(SubscriptionState::Halted);
        publisher.transition(SubscriptionState::Fetching);

        assert_eq!(health.state(), SubscriptionState::Halted);
        assert!(health.is_halted());
        assert!(!health.report().operational);
    }

    #[tokio::test]
    async fn test_wait_for_halt() {
        let (publisher, health) = publisher();
        let waiter = {
            let health = health.clone();
            tokio::spawn(async move { health.wait_for_halt().await })
        };

        publisher.transition(SubscriptionState::ErrorCounting);
        publisher.transition(SubscriptionState::Halted);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_halt_returns_false_when_loop_exits() {
        let (publisher, health) = publisher();
        drop(publisher);
        assert!(!health.wait_for_halt().await);
    }

    #[test]
    fn test_report_serializes() {
        let (_publisher, health) = publisher();
        let json = serde_json::to_value(health.report()).unwrap();
        assert_eq!(json["state"], "connected");
        assert_eq!(json["operational"], true);
    }
}
