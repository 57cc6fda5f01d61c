//! In-memory [`BrokerClient`] double, used by scenario tests across the
//! workspace.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};

use crate::client::{BrokerClient, BrokerCommand};
use crate::error::{BrokerError, BrokerResult};
use crate::events::ConnectionEvent;

#[derive(Default)]
struct FakeState {
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, std::collections::HashSet<String>>,
    json_docs: HashMap<String, serde_json::Value>,
    supports_json: bool,
    disrupted: bool,
}

/// In-memory stand-in for a real broker. `notify` wakes blocking pops when a
/// list gains an element; disruption is injected via [`FakeBroker::disrupt`]
/// / [`FakeBroker::recover`] for connection-flap scenario tests.
#[derive(Clone)]
pub struct FakeBroker {
    identifier: String,
    state: Arc<Mutex<FakeState>>,
    notify: Arc<Notify>,
    events_tx: broadcast::Sender<ConnectionEvent>,
}

impl std::fmt::Debug for FakeBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeBroker").field("identifier", &self.identifier).finish()
    }
}

impl FakeBroker {
    pub fn new(identifier: impl Into<String>) -> Self {
        let mut state = FakeState::default();
        state.supports_json = true;
        let (events_tx, _) = broadcast::channel(64);
        Self {
            identifier: identifier.into(),
            state: Arc::new(Mutex::new(state)),
            notify: Arc::new(Notify::new()),
            events_tx,
        }
    }

    /// Create a double that reports `FeatureUnsupported` for JSON path
    /// commands, exercising the tracer's Set fallback.
    pub fn without_json_support(identifier: impl Into<String>) -> Self {
        let broker = Self::new(identifier);
        broker.state.lock().supports_json = false;
        broker
    }

    pub fn disrupt(&self) {
        let mut state = self.state.lock();
        if !state.disrupted {
            state.disrupted = true;
            let _ = self.events_tx.send(ConnectionEvent::Disrupted {
                identifier: self.identifier.clone(),
            });
        }
    }

    pub fn recover(&self) {
        let mut state = self.state.lock();
        if state.disrupted {
            state.disrupted = false;
            let _ = self.events_tx.send(ConnectionEvent::Recovered {
                identifier: self.identifier.clone(),
            });
        }
        drop(state);
        self.notify.notify_waiters();
    }

    fn check_disrupted(&self) -> BrokerResult<()> {
        if self.state.lock().disrupted {
            Err(BrokerError::ConnectionUnavailable {
                identifier: self.identifier.clone(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerClient for FakeBroker {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute_atomic(&self, commands: Vec<BrokerCommand>) -> BrokerResult<()> {
        self.check_disrupted()?;
        let mut state = self.state.lock();
        for command in commands {
            match command {
                BrokerCommand::ListPush { queue, value } => {
                    state.lists.entry(queue).or_default().push_front(value);
                }
                BrokerCommand::HashSet { location, field, value } => {
                    state.hashes.entry(location).or_default().insert(field, value);
                }
                BrokerCommand::HashDelete { location, field } => {
                    if let Some(h) = state.hashes.get_mut(&location) {
                        h.remove(&field);
                    }
                }
                BrokerCommand::SetAdd { location, member } => {
                    state.sets.entry(location).or_default().insert(member);
                }
                BrokerCommand::Expire { .. } => {
                    // no TTL semantics in the fake; acceptable for tests
                }
            }
        }
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn list_push(&self, queue: &str, value: &str) -> BrokerResult<()> {
        self.check_disrupted()?;
        self.state
            .lock()
            .lists
            .entry(queue.to_string())
            .or_default()
            .push_front(value.to_string());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn list_pop_tail_blocking(
        &self,
        queue: &str,
        timeout_seconds: u64,
    ) -> BrokerResult<Option<String>> {
        let deadline = if timeout_seconds == 0 {
            None
        } else {
            Some(tokio::time::Instant::now() + std::time::Duration::from_secs(timeout_seconds))
        };
        loop {
            self.check_disrupted()?;
            if let Some(value) = self.state.lock().lists.get_mut(queue).and_then(|q| q.pop_back()) {
                return Ok(Some(value));
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return Ok(None);
                }
                let _ = tokio::time::timeout_at(deadline, self.notify.notified()).await;
            } else {
                self.notify.notified().await;
            }
        }
    }

    async fn list_pop_tail_push_head_blocking(
        &self,
        src: &str,
        dst: &str,
        timeout_seconds: u64,
    ) -> BrokerResult<Option<String>> {
        let deadline = if timeout_seconds == 0 {
            None
        } else {
            Some(tokio::time::Instant::now() + std::time::Duration::from_secs(timeout_seconds))
        };
        loop {
            self.check_disrupted()?;
            let popped = {
                let mut state = self.state.lock();
                let value = state.lists.get_mut(src).and_then(|q| q.pop_back());
                if let Some(ref value) = value {
                    state
                        .lists
                        .entry(dst.to_string())
                        .or_default()
                        .push_front(value.clone());
                }
                value
            };
            if let Some(value) = popped {
                self.notify.notify_waiters();
                return Ok(Some(value));
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return Ok(None);
                }
                let _ = tokio::time::timeout_at(deadline, self.notify.notified()).await;
            } else {
                self.notify.notified().await;
            }
        }
    }

    async fn hash_set(&self, location: &str, field: &str, value: &str) -> BrokerResult<()> {
        self.check_disrupted()?;
        self.state
            .lock()
            .hashes
            .entry(location.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, location: &str, field: &str) -> BrokerResult<Option<String>> {
        self.check_disrupted()?;
        Ok(self
            .state
            .lock()
            .hashes
            .get(location)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hash_delete(&self, location: &str, field: &str) -> BrokerResult<()> {
        self.check_disrupted()?;
        if let Some(h) = self.state.lock().hashes.get_mut(location) {
            h.remove(field);
        }
        Ok(())
    }

    async fn set_add(&self, location: &str, member: &str) -> BrokerResult<()> {
        self.check_disrupted()?;
        self.state
            .lock()
            .sets
            .entry(location.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_is_member(&self, location: &str, member: &str) -> BrokerResult<bool> {
        self.check_disrupted()?;
        Ok(self
            .state
            .lock()
            .sets
            .get(location)
            .is_some_and(|s| s.contains(member)))
    }

    async fn set_members(&self, location: &str) -> BrokerResult<Vec<String>> {
        self.check_disrupted()?;
        Ok(self
            .state
            .lock()
            .sets
            .get(location)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn expire(&self, _key: &str, _seconds: i64) -> BrokerResult<()> {
        self.check_disrupted()?;
        Ok(())
    }

    async fn set_json_path(
        &self,
        key: &str,
        path: &str,
        value: &serde_json::Value,
        _ttl_seconds: Option<i64>,
    ) -> BrokerResult<()> {
        self.check_disrupted()?;
        let mut state = self.state.lock();
        if !state.supports_json {
            return Err(BrokerError::FeatureUnsupported("JSON.SET".into()));
        }
        set_at_path(state.json_docs.entry(key.to_string()).or_insert_with(|| serde_json::json!({})), path, value.clone());
        Ok(())
    }

    async fn append_json_array_path(
        &self,
        key: &str,
        path: &str,
        value: &serde_json::Value,
    ) -> BrokerResult<()> {
        self.check_disrupted()?;
        let mut state = self.state.lock();
        if !state.supports_json {
            return Err(BrokerError::FeatureUnsupported("JSON.ARRAPPEND".into()));
        }
        let doc = state
            .json_docs
            .entry(key.to_string())
            .or_insert_with(|| serde_json::json!({}));
        append_at_path(doc, path, value.clone());
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> BrokerResult<()> {
        self.check_disrupted()?;
        let _ = self.events_tx.send(ConnectionEvent::Recovered {
            identifier: format!("{channel}:{message}"),
        });
        Ok(())
    }

    async fn subscribe(&self, _channel: &str) -> BrokerResult<broadcast::Receiver<String>> {
        let (_tx, rx) = broadcast::channel(1);
        Ok(rx)
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }
}

/// Minimal `$.trace`-style path setter: supports only the single top-level
/// key path the tracer uses (`$.trace`), which is all this double needs.
fn set_at_path(doc: &mut serde_json::Value, path: &str, value: serde_json::Value) {
    let key = path.trim_start_matches("$.");
    if let Some(obj) = doc.as_object_mut() {
        obj.insert(key.to_string(), value);
    }
}

fn append_at_path(doc: &mut serde_json::Value, path: &str, value: serde_json::Value) {
    let key = path.trim_start_matches("$.");
    if let Some(obj) = doc.as_object_mut() {
        let entry = obj.entry(key.to_string()).or_insert_with(|| serde_json::json!([]));
        if let Some(array) = entry.as_array_mut() {
            array.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_blocking_pop() {
        let broker = FakeBroker::new("test");
        broker.list_push("q", "hello").await.unwrap();
        let value = broker.list_pop_tail_blocking("q", 1).await.unwrap();
        assert_eq!(value, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn pop_push_is_atomic_move() {
        let broker = FakeBroker::new("test");
        broker.list_push("pending", "m1").await.unwrap();
        let value = broker
            .list_pop_tail_push_head_blocking("pending", "processing", 1)
            .await
            .unwrap();
        assert_eq!(value, Some("m1".to_string()));
        assert_eq!(broker.state.lock().lists.get("pending").map(|q| q.len()), Some(0));
        assert_eq!(
            broker.state.lock().lists.get("processing").map(|q| q.len()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn disrupted_broker_fails_fast() {
        let broker = FakeBroker::new("test");
        broker.disrupt();
        let err = broker.list_push("q", "x").await.unwrap_err();
        assert!(matches!(err, BrokerError::ConnectionUnavailable { .. }));
    }

    #[tokio::test]
    async fn json_fallback_reports_unsupported() {
        let broker = FakeBroker::without_json_support("test");
        let err = broker
            .append_json_array_path("trace", "$.trace", &serde_json::json!({"a":1}))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::FeatureUnsupported(_)));
    }
}
