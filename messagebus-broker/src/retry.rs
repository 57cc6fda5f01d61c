//! Increasing-backoff retry for the broker *link* itself.
//!
//! Distinct from the dispatcher's [`RetryPolicy`][crate::retry] concept of
//! the same name in `messagebus-shared` — that one retries a *message send*;
//! this one retries reconnecting the underlying broker connection.

use std::time::Duration;

use tracing::warn;

use crate::error::BrokerError;

/// Step used for the increasing backoff: 50ms per attempt, capped.
const BACKOFF_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
pub struct LinkRetryConfig {
    pub max_attempts: u32,
    pub max_interval: Duration,
}

impl Default for LinkRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_interval: Duration::from_secs(1),
        }
    }
}

/// Runs `connect` with increasing backoff until it succeeds or the
/// configured attempt ceiling is exceeded.
pub async fn connect_with_backoff<F, Fut, T>(
    identifier: &str,
    config: LinkRetryConfig,
    mut connect: F,
) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BrokerError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match connect().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= config.max_attempts => {
                warn!(
                    identifier,
                    attempt,
                    error = %err,
                    "broker link retry budget exceeded"
                );
                return Err(BrokerError::RetryExceeded { attempts: attempt });
            }
            Err(err) => {
                let backoff = std::cmp::min(BACKOFF_STEP * attempt, config.max_interval);
                warn!(
                    identifier,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "broker link attempt failed, backing off"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
