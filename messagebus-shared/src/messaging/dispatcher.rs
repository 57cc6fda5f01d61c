//! # Message Dispatcher
//!
//! Process-wide singleton, constructed once at startup and threaded
//! explicitly via `Arc<MessageDispatcher>`. Wraps the exchange's send operations in a
//! [`RetryPolicy`] and records trace entries around send/deliver/fail.

use std::sync::Arc;

use tracing::warn;

use crate::errors::{MessagingError, MessagingResult};
use crate::messaging::exchange::MessageExchange;
use crate::messaging::handler::MessageObserver;
use crate::model::{DispatchEvent, Message, MessageKind, MessageState};
use crate::resilience::CircuitBreakerBehavior;
use crate::tracer::MessageTracer;

/// Executes an action up to `max_attempts` times. On each failure past the
/// first, invokes `on_retry`; on every failure, invokes `on_failed_attempt`.
/// Exceptions inside hooks are swallowed.
pub struct RetryPolicy {
    max_attempts: u32,
    on_retry: Box<dyn Fn(u32, &MessagingError) + Send + Sync>,
    on_failed_attempt: Box<dyn Fn(u32, &MessagingError) + Send + Sync>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            on_retry: Box::new(|_, _| {}),
            on_failed_attempt: Box::new(|_, _| {}),
        }
    }

    pub fn with_on_retry(mut self, hook: impl Fn(u32, &MessagingError) + Send + Sync + 'static) -> Self {
        self.on_retry = Box::new(hook);
        self
    }

    pub fn with_on_failed_attempt(
        mut self,
        hook: impl Fn(u32, &MessagingError) + Send + Sync + 'static,
    ) -> Self {
        self.on_failed_attempt = Box::new(hook);
        self
    }

    pub async fn run<F, Fut>(&self, mut action: F) -> MessagingResult<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = MessagingResult<()>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match action().await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    call_hook(&self.on_failed_attempt, attempt, &err);
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    call_hook(&self.on_retry, attempt, &err);
                }
            }
        }
    }

    fn note_failed_attempt(&self, attempt: u32, err: &MessagingError) {
        call_hook(&self.on_failed_attempt, attempt, err);
    }

    fn note_retry(&self, attempt: u32, err: &MessagingError) {
        call_hook(&self.on_retry, attempt, err);
    }
}

fn call_hook(hook: &(dyn Fn(u32, &MessagingError) + Send + Sync), attempt: u32, err: &MessagingError) {
    if let Err(panic) =
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(attempt, err)))
    {
        warn!(panic = ?panic, "retry hook panicked, ignoring");
    }
}

pub struct MessageDispatcher {
    exchange: Arc<MessageExchange>,
    tracer: Option<Arc<MessageTracer>>,
    breaker: Option<Arc<dyn CircuitBreakerBehavior>>,
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher").finish_non_exhaustive()
    }
}

impl MessageDispatcher {
    /// `initialize(exchange)`: store the exchange and invoke
    /// `enableMessaging`, resolving only after every handler is enabled.
    pub async fn initialize(
        exchange: Arc<MessageExchange>,
        tracer: Option<Arc<MessageTracer>>,
        breaker: Option<Arc<dyn CircuitBreakerBehavior>>,
    ) -> Arc<Self> {
        exchange.enable_messaging().await;
        Arc::new(Self { exchange, tracer, breaker })
    }

    pub async fn shut_down(&self) {
        self.exchange.disable_messaging().await;
    }

    pub fn add_message_observer_requests_in(&self, observer: Arc<dyn MessageObserver>) {
        self.exchange.add_request_observer(observer);
    }

    pub fn add_message_observer_responses_in(&self, observer: Arc<dyn MessageObserver>) {
        self.exchange.add_response_observer(observer);
    }

    /// `sendRequest(message) -> messageID`: retry up to 3
    /// attempts, SENT/PENDING before attempts, DELIVERED/PENDING on first
    /// success, FAILED/PENDING on final failure.
    pub async fn send_request(&self, message: &mut Message) -> MessagingResult<crate::model::MessageId> {
        self.trace(message, MessageKind::Request, DispatchEvent::Sent, MessageState::Pending);
        self.check_breaker()?;

        let started = std::time::Instant::now();
        let policy = RetryPolicy::new(3);
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.exchange.send_message_request(message).await {
                Ok(()) => break Ok(()),
                Err(err) => {
                    policy.note_failed_attempt(attempt, &err);
                    if attempt >= policy.max_attempts {
                        break Err(err);
                    }
                    policy.note_retry(attempt, &err);
                }
            }
        };
        self.record_breaker_outcome(&result, started);

        match &result {
            Ok(()) => self.trace(message, MessageKind::Request, DispatchEvent::Delivered, MessageState::Pending),
            Err(_) => self.trace(message, MessageKind::Request, DispatchEvent::Failed, MessageState::Pending),
        }

        result.map(|()| message.message_id.clone())
    }

    /// `sendResponse(message)`: symmetric, state PROCESSED.
    pub async fn send_response(&self, message: &mut Message) -> MessagingResult<()> {
        self.trace(message, MessageKind::Response, DispatchEvent::Sent, MessageState::Processed);
        self.check_breaker()?;

        let started = std::time::Instant::now();
        let policy = RetryPolicy::new(3);
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.exchange.send_message_response(message).await {
                Ok(()) => break Ok(()),
                Err(err) => {
                    policy.note_failed_attempt(attempt, &err);
                    if attempt >= policy.max_attempts {
                        break Err(err);
                    }
                    policy.note_retry(attempt, &err);
                }
            }
        };
        self.record_breaker_outcome(&result, started);

        match &result {
            Ok(()) => self.trace(message, MessageKind::Response, DispatchEvent::Delivered, MessageState::Processed),
            Err(_) => self.trace(message, MessageKind::Response, DispatchEvent::Failed, MessageState::Processed),
        }

        result
    }

    fn check_breaker(&self) -> MessagingResult<()> {
        if let Some(breaker) = &self.breaker {
            if !breaker.should_allow() {
                return Err(MessagingError::SenderUnavailable {
                    identifier: "circuit-open".to_string(),
                });
            }
        }
        Ok(())
    }

    fn record_breaker_outcome(&self, result: &MessagingResult<()>, started: std::time::Instant) {
        if let Some(breaker) = &self.breaker {
            match result {
                Ok(()) => breaker.record_success(started.elapsed()),
                Err(_) => breaker.record_failure(started.elapsed()),
            }
        }
    }

    fn trace(&self, message: &Message, kind: MessageKind, event: DispatchEvent, state: MessageState) {
        if let Some(tracer) = &self.tracer {
            tracer.record_trace_entry(message, kind, event, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_policy_surfaces_last_error_on_exhaustion() {
        let policy = RetryPolicy::new(3);
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = policy
            .run(|| {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(MessagingError::SenderUnavailable { identifier: "x".into() }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_policy_stops_on_first_success() {
        let policy = RetryPolicy::new(3);
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = policy
            .run(|| {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move { if n == 0 { Ok(()) } else { unreachable!() } }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hooks_fire_on_retry_and_failed_attempt() {
        let retries = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let failures = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let r = retries.clone();
        let f = failures.clone();
        let policy = RetryPolicy::new(2)
            .with_on_retry(move |_, _| {
                r.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
            .with_on_failed_attempt(move |_, _| {
                f.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });
        let _ = policy
            .run(|| async { Err(MessagingError::SenderUnavailable { identifier: "x".into() }) })
            .await;
        assert_eq!(retries.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(failures.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
