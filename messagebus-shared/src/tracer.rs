//! # Message Tracer
//!
//! `record_trace_entry` is fire-and-forget: it spawns the snapshot build,
//! obscuring, and broker append on a detached task so the dispatcher/caller
//! call site is never blocked on, or able to fail because of, tracing.

use std::sync::Arc;
use std::sync::LazyLock;

use messagebus_broker::BrokerClient;
use regex::Regex;
use tracing::{error, warn};

use crate::config::MessageExchangeConfig;
use crate::model::{DispatchEvent, Message, MessageKind, MessageState, TraceEntry};

static SENSITIVE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)pin|pass|otp").expect("static pattern is valid"));

const OBSCURED_VALUE: &str = "***OBSCURED***";

#[derive(Debug)]
pub struct MessageTracer {
    broker: Arc<dyn BrokerClient>,
    config: MessageExchangeConfig,
}

impl MessageTracer {
    pub fn new(broker: Arc<dyn BrokerClient>, config: MessageExchangeConfig) -> Self {
        Self { broker, config }
    }

    /// Build and append a trace entry on a detached task. Never blocks the
    /// caller and never surfaces an error.
    pub fn record_trace_entry(
        self: &Arc<Self>,
        message: &Message,
        message_type: MessageKind,
        event: DispatchEvent,
        state: MessageState,
    ) {
        if !self.config.trace_log_enabled {
            return;
        }

        let tracer = self.clone();
        let message = message.clone();
        tokio::spawn(async move {
            tracer.record_trace_entry_inner(message, message_type, event, state).await;
        });
    }

    async fn record_trace_entry_inner(
        &self,
        message: Message,
        message_type: MessageKind,
        event: DispatchEvent,
        state: MessageState,
    ) {
        let (from_address, to_address) = addresses(&message, message_type);
        let snapshot = build_snapshot(&message);

        let entry = TraceEntry {
            trace_id: uuid::Uuid::now_v7().to_string(),
            trace_timestamp: chrono::Utc::now(),
            chain_id: message.chain_id.clone(),
            message_id: message.message_id.clone(),
            message_type,
            dispatch_event: event,
            message_state: state,
            from_address,
            to_address,
            message_snapshot: snapshot,
        };

        if event == DispatchEvent::Failed {
            error!(trace_id = %entry.trace_id, message_id = %entry.message_id, "trace: dispatch failed");
        } else {
            tracing::info!(trace_id = %entry.trace_id, message_id = %entry.message_id, event = ?event, "trace entry");
        }

        if let Err(err) = self.append_entry(&entry).await {
            warn!(trace_id = %entry.trace_id, error = %err, "failed to persist trace entry");
        }
    }

    async fn append_entry(&self, entry: &TraceEntry) -> messagebus_broker::BrokerResult<()> {
        let value = serde_json::to_value(entry).map_err(messagebus_broker::BrokerError::from)?;
        let key = &self.config.trace_repository;

        let result = self.broker.append_json_array_path(key, "$.trace", &value).await;
        match result {
            Ok(()) => {}
            Err(messagebus_broker::BrokerError::FeatureUnsupported(_)) => {
                let encoded = serde_json::to_string(entry).map_err(messagebus_broker::BrokerError::from)?;
                self.broker.set_add(key, &encoded).await?;
            }
            Err(err) => return Err(err),
        }

        if self.config.trace_expiration_time > 0 {
            self.broker.expire(key, self.config.trace_expiration_time).await?;
        }
        Ok(())
    }
}

fn addresses(message: &Message, message_type: MessageKind) -> (String, String) {
    let source = format!("{}.{}", message.source.route, message.source.instance_id);
    let destination = match &message.destination.instance_id {
        Some(id) => format!("{}.{}", message.destination.route, id),
        None => message.destination.route.clone(),
    };

    match message_type {
        MessageKind::Request => (source, destination),
        MessageKind::Response => (destination, source),
    }
}

/// Deep-copy `message`, strip `payload`/`chain_id`/`message_id`, and obscure
/// any object key matching `/pin|pass|otp/i`.
fn build_snapshot(message: &Message) -> serde_json::Value {
    let mut value = serde_json::to_value(message).expect("Message serialization cannot fail");
    if let Some(obj) = value.as_object_mut() {
        obj.remove("payload");
        obj.remove("chain_id");
        obj.remove("message_id");
    }
    obscure_sensitive_keys(&mut value);
    value
}

fn obscure_sensitive_keys(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if SENSITIVE_KEY.is_match(key) {
                    *entry = serde_json::Value::String(OBSCURED_VALUE.to_string());
                } else {
                    obscure_sensitive_keys(entry);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                obscure_sensitive_keys(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DestinationAddress, SourceAddress};
    use messagebus_broker::FakeBroker;

    fn sample_message() -> Message {
        let mut message = Message::new_root(
            SourceAddress {
                instance_id: "inst-a".into(),
                route: "domain-a".into(),
            },
            DestinationAddress {
                instance_id: Some("inst-b".into()),
                route: "domain-b".into(),
            },
        );
        message.payload = Some(serde_json::json!({"pin": "1234", "amount": 10}));
        message
    }

    #[test]
    fn obscures_sensitive_keys_recursively() {
        let mut value = serde_json::json!({"otp_code": "9999", "nested": {"password": "x"}, "amount": 5});
        obscure_sensitive_keys(&mut value);
        assert_eq!(value["otp_code"], OBSCURED_VALUE);
        assert_eq!(value["nested"]["password"], OBSCURED_VALUE);
        assert_eq!(value["amount"], 5);
    }

    #[test]
    fn snapshot_strips_payload_and_identifiers() {
        let message = sample_message();
        let snapshot = build_snapshot(&message);
        assert!(snapshot.get("payload").is_none());
        assert!(snapshot.get("chain_id").is_none());
        assert!(snapshot.get("message_id").is_none());
    }

    #[tokio::test]
    async fn appends_to_json_path_when_supported() {
        let broker = Arc::new(FakeBroker::new("test"));
        let tracer = Arc::new(MessageTracer::new(
            broker.clone(),
            MessageExchangeConfig {
                trace_repository: "trace:repo".into(),
                ..Default::default()
            },
        ));

        tracer.record_trace_entry(
            &sample_message(),
            MessageKind::Request,
            DispatchEvent::Sent,
            MessageState::Pending,
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let err = broker
            .append_json_array_path("trace:repo", "$.trace", &serde_json::json!({}))
            .await;
        assert!(err.is_ok());
    }

    #[tokio::test]
    async fn falls_back_to_set_when_json_unsupported() {
        let broker = Arc::new(FakeBroker::without_json_support("test"));
        let tracer = Arc::new(MessageTracer::new(
            broker.clone(),
            MessageExchangeConfig {
                trace_repository: "trace:repo".into(),
                ..Default::default()
            },
        ));

        tracer
            .append_entry(&TraceEntry {
                trace_id: "t1".into(),
                trace_timestamp: chrono::Utc::now(),
                chain_id: "c1".into(),
                message_id: crate::model::MessageId::new(),
                message_type: MessageKind::Request,
                dispatch_event: DispatchEvent::Sent,
                message_state: MessageState::Pending,
                from_address: "a".into(),
                to_address: "b".into(),
                message_snapshot: serde_json::json!({}),
            })
            .await
            .unwrap();

        let members = broker.set_members("trace:repo").await.unwrap();
        assert_eq!(members.len(), 1);
    }
}
