//! Error taxonomy for the broker link.

use thiserror::Error;

/// Errors surfaced by the broker client.
///
/// These are link-level errors only — they say nothing about the
/// application-level meaning of a message. `messagebus-shared` wraps this
/// type inside its own `MessagingError::Internal` variant where needed.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection retry budget exceeded after {attempts} attempts")]
    RetryExceeded { attempts: u32 },

    #[error("broker connection for {identifier} is disrupted")]
    ConnectionUnavailable { identifier: String },

    #[error("broker does not support feature: {0}")]
    FeatureUnsupported(String),

    #[error("broker command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("failed to serialize value for broker command: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Command(_) | BrokerError::ConnectionUnavailable { .. })
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
