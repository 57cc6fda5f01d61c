//! # Data Model
//!
//! `Message` is the unit exchanged on every queue. `ServiceCall` extends it
//! with call-level state. Rust has no struct inheritance, so `ServiceCall`
//! composes a `Message` the way a value object wraps its identity fields —
//! `service_call.message.message_id` rather than a shared base class.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceCallError;

/// A globally unique message identifier, generated at create time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The originator of a message: domain name + process id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAddress {
    pub instance_id: String,
    pub route: String,
}

/// The destination of a message. `instance_id` is only set once a provider
/// instance has accepted the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationAddress {
    pub instance_id: Option<String>,
    pub route: String,
}

/// The unit exchanged on all queues.
///
/// Immutable once sent except for `destination.instance_id` (stamped on
/// acceptance) and `hash` (stamped on send).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub chain_id: String,
    pub chain_level: u32,
    pub source: SourceAddress,
    pub destination: DestinationAddress,
    pub payload: Option<serde_json::Value>,
    pub sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Message {
    /// Build the root message of a new chain.
    pub fn new_root(source: SourceAddress, destination: DestinationAddress) -> Self {
        let message_id = MessageId::new();
        Self {
            chain_id: message_id.0.clone(),
            message_id,
            chain_level: 0,
            source,
            destination,
            payload: None,
            sequence: 0,
            hash: None,
        }
    }

    /// Strip the `hash` field, returning it. Used before re-computing or
    /// verifying integrity.
    pub fn take_hash(&mut self) -> Option<String> {
        self.hash.take()
    }
}

/// `{ serviceDomainName, serviceAlias, serviceVersion? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAddress {
    pub service_domain_name: String,
    pub service_alias: String,
    pub service_version: Option<String>,
}

impl ServiceAddress {
    pub fn new(domain: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            service_domain_name: domain.into(),
            service_alias: alias.into(),
            service_version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }
}

/// Uniform response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCallResult {
    pub is_successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ServiceCallError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ServiceCallResult {
    pub fn success(payload: Option<serde_json::Value>) -> Self {
        Self {
            is_successful: true,
            exception: None,
            payload,
        }
    }

    pub fn failure(exception: ServiceCallError) -> Self {
        Self {
            is_successful: false,
            exception: Some(exception),
            payload: None,
        }
    }
}

/// A `Message` extended with call-level state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    pub message: Message,
    pub auth_token: String,
    pub service_address: ServiceAddress,
    pub service_params: serde_json::Map<String, serde_json::Value>,
    pub predecessor: Option<MessageId>,
    /// Empty by default; a handler only appends here when it spawns a
    /// nested call.
    pub successors: Vec<MessageId>,
    pub created_on: DateTime<Utc>,
    pub finished_on: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<i64>,
    pub is_completed: bool,
    pub result: Option<ServiceCallResult>,
}

impl ServiceCall {
    pub fn message_id(&self) -> &MessageId {
        &self.message.message_id
    }

    pub fn chain_id(&self) -> &str {
        &self.message.chain_id
    }

    /// Stamp completion fields. Called exactly once: `createdOn <= finishedOn`,
    /// `executionTime == finishedOn - createdOn`, and `isCompleted == true`
    /// iff the handler was invoked.
    pub fn complete(&mut self, result: ServiceCallResult) {
        let now = Utc::now();
        self.finished_on = Some(now);
        self.execution_time_ms = Some((now - self.created_on).num_milliseconds().max(0));
        self.is_completed = true;
        self.result = Some(result);
    }
}

/// Message direction, used on trace entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    Request,
    Response,
}

/// Dispatch event recorded on a trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DispatchEvent {
    Sent,
    Delivered,
    Failed,
    Received,
}

/// State of the message at the point the trace entry was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageState {
    Pending,
    Processed,
}

/// Tamper-safe, privacy-scrubbed snapshot of one dispatch event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub trace_id: String,
    pub trace_timestamp: DateTime<Utc>,
    pub chain_id: String,
    pub message_id: MessageId,
    pub message_type: MessageKind,
    pub dispatch_event: DispatchEvent,
    pub message_state: MessageState,
    pub from_address: String,
    pub to_address: String,
    pub message_snapshot: serde_json::Value,
}
