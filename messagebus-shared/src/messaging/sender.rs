//! # Message Sender

use std::sync::Arc;

use messagebus_broker::BrokerClient;
use tracing::debug;

use crate::errors::{MessagingError, MessagingResult};
use crate::hash::compute_hash;
use crate::messaging::handler::MessageHandlerBase;
use crate::model::Message;

/// Push-writes messages onto a route queue.
#[derive(Debug)]
pub struct MessageSender {
    base: Arc<MessageHandlerBase>,
    broker: Arc<dyn BrokerClient>,
    hash_key: Option<Vec<u8>>,
}

impl MessageSender {
    pub fn new(identifier: impl Into<String>, broker: Arc<dyn BrokerClient>, hash_key: Option<Vec<u8>>) -> Self {
        Self {
            base: Arc::new(MessageHandlerBase::new(identifier)),
            broker,
            hash_key,
        }
    }

    pub fn base(&self) -> &Arc<MessageHandlerBase> {
        &self.base
    }

    pub fn broker(&self) -> Arc<dyn BrokerClient> {
        self.broker.clone()
    }

    /// Push `message` onto `queue`.
    ///
    /// Completion of the broker command is "sent" — it is **not** a
    /// delivery guarantee to any consumer.
    pub async fn send(&self, message: &mut Message, queue: &str) -> MessagingResult<()> {
        if !self.base.is_available() {
            return Err(MessagingError::SenderUnavailable {
                identifier: self.base.identifier().to_string(),
            });
        }

        if let Some(key) = &self.hash_key {
            message.hash = None;
            let hash = compute_hash(message, key);
            message.hash = Some(hash);
        }

        let payload = serde_json::to_string(message).map_err(|e| {
            MessagingError::AbstractContract(format!("failed to serialize message: {e}"))
        })?;

        debug!(queue, message_id = %message.message_id, "pushing message");
        self.broker
            .list_push(queue, &payload)
            .await
            .map_err(MessagingError::from)?;
        Ok(())
    }
}
