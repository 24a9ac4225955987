//! # Resilience Module
//!
//! Fault isolation for the subscription pull loop. A consecutive-failure
//! circuit breaker stops fetching once the transport has failed too many times
//! in a row, and exposes its counters for health reporting.

pub mod circuit_breaker;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use metrics::CircuitBreakerMetrics;
