use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{CircuitBreakerBehavior, CircuitBreakerMetrics, CircuitState};

/// Consecutive-failure breaker: opens after `failure_threshold` consecutive
/// failures, half-opens after `cooldown` elapses, closes again on the first
/// success while half-open.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u64,
    cooldown: Duration,
    consecutive_failures: AtomicU64,
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u64, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            cooldown,
            consecutive_failures: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            opened_at: Mutex::new(None),
        }
    }
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CircuitState {
        let opened_at = *self.opened_at.lock();
        match opened_at {
            None => CircuitState::Closed,
            Some(at) if at.elapsed() >= self.cooldown => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    fn should_allow(&self) -> bool {
        !matches!(self.state(), CircuitState::Open)
    }

    fn record_success(&self, _duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.opened_at.lock() = None;
    }

    fn record_failure(&self, _duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        let consecutive = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if consecutive >= self.failure_threshold {
            let mut opened_at = self.opened_at.lock();
            if opened_at.is_none() {
                *opened_at = Some(Instant::now());
            }
        }
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            current_state_is_open: matches!(self.state(), CircuitState::Open),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("dispatcher", 3, Duration::from_millis(50));
        for _ in 0..2 {
            breaker.record_failure(Duration::ZERO);
        }
        assert!(breaker.should_allow());
        breaker.record_failure(Duration::ZERO);
        assert!(!breaker.should_allow());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("dispatcher", 3, Duration::from_millis(50));
        breaker.record_failure(Duration::ZERO);
        breaker.record_failure(Duration::ZERO);
        breaker.record_success(Duration::ZERO);
        assert_eq!(breaker.metrics().consecutive_failures, 0);
        assert!(breaker.should_allow());
    }

    #[tokio::test]
    async fn half_opens_after_cooldown() {
        let breaker = CircuitBreaker::new("dispatcher", 1, Duration::from_millis(20));
        breaker.record_failure(Duration::ZERO);
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.should_allow());
    }
}
