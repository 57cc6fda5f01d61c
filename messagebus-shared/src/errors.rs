//! Error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use messagebus_broker::BrokerError;

/// Errors at the messaging layer (handler/sender/receiver/exchange/dispatcher).
#[derive(Debug, Error)]
pub enum MessagingError {
    /// An abstract operation was invoked without override — a programming
    /// error, fatal locally, surfaced to the caller.
    #[error("abstract contract violated: {0}")]
    AbstractContract(String),

    #[error("sender is unavailable: connection {identifier} is disrupted")]
    SenderUnavailable { identifier: String },

    #[error("broker retry ceiling exceeded")]
    RetryExceeded(#[source] BrokerError),

    #[error("message tampering detected for message {message_id}")]
    MessageTampering { message_id: String },

    #[error("broker does not support feature: {0}")]
    FeatureUnsupported(String),

    #[error("internal messaging error: {0}")]
    Internal(#[from] BrokerError),
}

/// Errors produced while resolving or executing a service call.
///
/// These never escape `ServiceCaller::execute_service_call` as an `Err` —
/// they are folded into `ServiceCallResult::exception` instead.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceCallError {
    #[error("service '{alias}' is not registered under domain '{domain}'")]
    ServiceNotRegistered { domain: String, alias: String },

    #[error("no handler registered for service alias '{alias}'")]
    ServiceNotFound { alias: String },

    #[error("no handler for alias '{alias}' version '{version}'")]
    ServiceHandlerNotFound { alias: String, version: String },

    #[error("authorization hook rejected the call: {reason}")]
    UnauthorizedAccess { reason: String },

    #[error("service call timed out after {timeout_ms}ms")]
    ServiceExecTimeout { timeout_ms: u64 },

    #[error("handler failed: {0}")]
    HandlerFailed(String),
}

pub type MessagingResult<T> = Result<T, MessagingError>;
