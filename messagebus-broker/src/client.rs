//! # Broker Client
//!
//! Thin capability surface over the memory-cache broker.
//! Deliberately narrow: everything above this layer only ever talks to the
//! broker through this trait, never to a concrete driver directly, so that
//! `messagebus-shared` and the scenario tests can swap in a `FakeBroker`.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::BrokerResult;
use crate::events::ConnectionEvent;

/// One command in an atomic multi-command batch.
#[derive(Debug, Clone)]
pub enum BrokerCommand {
    ListPush { queue: String, value: String },
    HashSet { location: String, field: String, value: String },
    HashDelete { location: String, field: String },
    SetAdd { location: String, member: String },
    Expire { key: String, seconds: i64 },
}

/// The broker command surface the rest of the bus depends on.
///
/// Names are contracts, not a wire format: a concrete driver (Redis, or any
/// other list/hash/set/pubsub store) is free to implement these however it
/// needs to, as long as the semantics documented on each method hold.
#[async_trait]
pub trait BrokerClient: Send + Sync + std::fmt::Debug {
    /// Stable identifier for this connection, used in connection events and
    /// in the disrupted-connections set.
    fn identifier(&self) -> &str;

    /// Run a list of commands as one atomic batch.
    async fn execute_atomic(&self, commands: Vec<BrokerCommand>) -> BrokerResult<()>;

    /// Push a value onto the head of a list.
    async fn list_push(&self, queue: &str, value: &str) -> BrokerResult<()>;

    /// Block (up to `timeout_seconds`, 0 = infinite) popping the tail of `queue`.
    /// Returns `None` on timeout.
    async fn list_pop_tail_blocking(
        &self,
        queue: &str,
        timeout_seconds: u64,
    ) -> BrokerResult<Option<String>>;

    /// Atomically pop the tail of `src` and push it to the head of `dst`,
    /// blocking up to `timeout_seconds` (0 = infinite). This is the
    /// "accepted but not yet processed" primitive required for request
    /// consumers.
    async fn list_pop_tail_push_head_blocking(
        &self,
        src: &str,
        dst: &str,
        timeout_seconds: u64,
    ) -> BrokerResult<Option<String>>;

    async fn hash_set(&self, location: &str, field: &str, value: &str) -> BrokerResult<()>;
    async fn hash_get(&self, location: &str, field: &str) -> BrokerResult<Option<String>>;
    async fn hash_delete(&self, location: &str, field: &str) -> BrokerResult<()>;

    async fn set_add(&self, location: &str, member: &str) -> BrokerResult<()>;
    async fn set_is_member(&self, location: &str, member: &str) -> BrokerResult<bool>;
    async fn set_members(&self, location: &str) -> BrokerResult<Vec<String>>;

    /// Refresh a key's expiry. `seconds <= 0` means no expiry.
    async fn expire(&self, key: &str, seconds: i64) -> BrokerResult<()>;

    /// Set a value at a JSON path within a document key.
    async fn set_json_path(
        &self,
        key: &str,
        path: &str,
        value: &serde_json::Value,
        ttl_seconds: Option<i64>,
    ) -> BrokerResult<()>;

    /// Append a value to a JSON array at `path` within a document key.
    /// Returns `Err(BrokerError::FeatureUnsupported)` when the driver lacks
    /// JSON path commands, so callers (the tracer) can fall back to a Set.
    async fn append_json_array_path(
        &self,
        key: &str,
        path: &str,
        value: &serde_json::Value,
    ) -> BrokerResult<()>;

    async fn publish(&self, channel: &str, message: &str) -> BrokerResult<()>;

    /// Subscribe to a pub/sub channel. Returns a receiver of raw payloads;
    /// callers decode them as needed.
    async fn subscribe(&self, channel: &str) -> BrokerResult<broadcast::Receiver<String>>;

    /// Stream of connection-disrupted/connection-recovered events for this
    /// client.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;
}
