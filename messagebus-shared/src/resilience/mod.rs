//! # Dispatcher Circuit Breaker (off by default)
//!
//! Ambient resilience infrastructure that lets
//! [`crate::messaging::dispatcher::MessageDispatcher`] fail fast on repeated
//! `SenderUnavailable` failures instead of always spending the full retry
//! budget. A `CircuitBreakerBehavior` trait with a single consecutive-failure
//! threshold rather than a sliding window, since the dispatcher only needs a
//! coarse fail-fast gate.

mod circuit_breaker;

pub use circuit_breaker::CircuitBreaker;

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u64,
    pub current_state_is_open: bool,
}

/// Unified interface any dispatcher-level breaker implements.
pub trait CircuitBreakerBehavior: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn state(&self) -> CircuitState;
    fn should_allow(&self) -> bool;
    fn record_success(&self, duration: Duration);
    fn record_failure(&self, duration: Duration);
    fn metrics(&self) -> CircuitBreakerMetrics;
}
