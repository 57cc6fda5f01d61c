//! # Message Exchange
//!
//! Holds up to two [`ExchangeGroup`]s — inbound (requests in / responses
//! out) and outbound (requests out / responses in) — derives queue names
//! from the configured prefix, tracks disrupted connections, and forwards
//! accepted inbound messages to dispatcher-registered observers after
//! stamping acceptance and recording a trace entry.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::warn;

use crate::model::{DispatchEvent, Message, MessageKind, MessageState};
use crate::queues::QueueNames;
use crate::tracer::MessageTracer;

use super::handler::MessageObserver;
use super::receiver::MessageReceiver;
use super::sender::MessageSender;

/// RequestsIn receiver + ResponsesOut sender.
pub struct InboundGroup {
    pub requests_in: Arc<MessageReceiver>,
    pub responses_out: Arc<MessageSender>,
}

/// RequestsOut sender + ResponsesIn receiver.
pub struct OutboundGroup {
    pub requests_out: Arc<MessageSender>,
    pub responses_in: Arc<MessageReceiver>,
}

pub struct MessageExchange {
    own_instance_id: String,
    queue_names: QueueNames,
    inbound: Option<InboundGroup>,
    outbound: Option<OutboundGroup>,
    tracer: Option<Arc<MessageTracer>>,
    disrupted: DashMap<String, ()>,
    request_observers: RwLock<Vec<Arc<dyn MessageObserver>>>,
    response_observers: RwLock<Vec<Arc<dyn MessageObserver>>>,
}

impl std::fmt::Debug for MessageExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageExchange")
            .field("own_instance_id", &self.own_instance_id)
            .field("has_inbound", &self.inbound.is_some())
            .field("has_outbound", &self.outbound.is_some())
            .finish()
    }
}

impl MessageExchange {
    pub fn new(
        own_instance_id: impl Into<String>,
        queue_names: QueueNames,
        inbound: Option<InboundGroup>,
        outbound: Option<OutboundGroup>,
        tracer: Option<Arc<MessageTracer>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            own_instance_id: own_instance_id.into(),
            queue_names,
            inbound,
            outbound,
            tracer,
            disrupted: DashMap::new(),
            request_observers: RwLock::new(Vec::new()),
            response_observers: RwLock::new(Vec::new()),
        })
    }

    pub fn queue_names(&self) -> &QueueNames {
        &self.queue_names
    }

    pub fn add_request_observer(&self, observer: Arc<dyn MessageObserver>) {
        self.request_observers.write().push(observer);
    }

    pub fn add_response_observer(&self, observer: Arc<dyn MessageObserver>) {
        self.response_observers.write().push(observer);
    }

    /// A connection is "in recovery" while its identifier is present in the
    /// disrupted set.
    pub fn is_disrupted(&self, identifier: &str) -> bool {
        self.disrupted.contains_key(identifier)
    }

    fn on_connection_disrupted(&self, identifier: &str) {
        self.disrupted.insert(identifier.to_string(), ());
    }

    fn on_connection_recovered(&self, identifier: &str) {
        self.disrupted.remove(identifier);
    }

    /// Start receivers and wire observer fan-out. Resolves only after every
    /// handler present has been enabled.
    pub async fn enable_messaging(self: &Arc<Self>) {
        if let Some(inbound) = &self.inbound {
            inbound.requests_in.base().add_observer(Arc::new(RequestIngestObserver {
                exchange: self.clone(),
            })).await;
            inbound.requests_in.start().await;
            self.watch_connection(inbound.requests_in.broker(), inbound.requests_in.base().identifier().to_string());
            self.watch_connection(inbound.responses_out.broker(), inbound.responses_out.base().identifier().to_string());
        }
        if let Some(outbound) = &self.outbound {
            outbound.responses_in.base().add_observer(Arc::new(ResponseIngestObserver {
                exchange: self.clone(),
            })).await;
            outbound.responses_in.start().await;
            self.watch_connection(outbound.requests_out.broker(), outbound.requests_out.base().identifier().to_string());
            self.watch_connection(outbound.responses_in.broker(), outbound.responses_in.base().identifier().to_string());
        }
    }

    pub async fn disable_messaging(&self) {
        if let Some(inbound) = &self.inbound {
            inbound.requests_in.stop().await;
        }
        if let Some(outbound) = &self.outbound {
            outbound.responses_in.stop().await;
        }
    }

    fn watch_connection(self: &Arc<Self>, broker: Arc<dyn messagebus_broker::BrokerClient>, identifier: String) {
        let exchange = self.clone();
        let mut events = broker.connection_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(messagebus_broker::ConnectionEvent::Disrupted { identifier: id }) if id == identifier => {
                        exchange.on_connection_disrupted(&id);
                    }
                    Ok(messagebus_broker::ConnectionEvent::Recovered { identifier: id }) if id == identifier => {
                        exchange.on_connection_recovered(&id);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
    }

    /// Send a request: push onto
    /// `<prefix>pending:<destDomain>` via the outbound group's sender.
    pub async fn send_message_request(&self, message: &mut Message) -> crate::errors::MessagingResult<()> {
        let Some(outbound) = &self.outbound else {
            return Err(crate::errors::MessagingError::AbstractContract(
                "no outbound group configured".to_string(),
            ));
        };
        let queue = self.queue_names.pending(&message.destination.route)?;
        outbound.requests_out.send(message, &queue).await
    }

    /// Send a response: push onto
    /// `<prefix>processed:<destDomain>:<destInstanceId>` via the inbound
    /// group's sender.
    pub async fn send_message_response(&self, message: &mut Message) -> crate::errors::MessagingResult<()> {
        let Some(inbound) = &self.inbound else {
            return Err(crate::errors::MessagingError::AbstractContract(
                "no inbound group configured".to_string(),
            ));
        };
        let Some(instance_id) = message.destination.instance_id.clone() else {
            return Err(crate::errors::MessagingError::AbstractContract(
                "response destination instance_id is unset".to_string(),
            ));
        };
        let queue = self.queue_names.processed(&message.destination.route, &instance_id)?;
        inbound.responses_out.send(message, &queue).await
    }

    fn accept_request(self: &Arc<Self>, mut message: Message) {
        message.destination.instance_id = Some(self.own_instance_id.clone());
        if let Some(tracer) = &self.tracer {
            tracer.record_trace_entry(
                &message,
                MessageKind::Request,
                DispatchEvent::Received,
                MessageState::Pending,
            );
        }
        let observers = self.request_observers.read();
        if observers.is_empty() {
            warn!(message_id = %message.message_id, "accepted request has no registered observers");
        }
        for observer in observers.iter() {
            observer.on_message(&message);
        }
    }

    fn accept_response(self: &Arc<Self>, message: Message) {
        if let Some(tracer) = &self.tracer {
            tracer.record_trace_entry(
                &message,
                MessageKind::Response,
                DispatchEvent::Received,
                MessageState::Processed,
            );
        }
        let observers = self.response_observers.read();
        for observer in observers.iter() {
            observer.on_message(&message);
        }
    }
}

#[derive(Debug)]
struct RequestIngestObserver {
    exchange: Arc<MessageExchange>,
}

impl MessageObserver for RequestIngestObserver {
    fn on_message(&self, message: &Message) {
        self.exchange.accept_request(message.clone());
    }
}

#[derive(Debug)]
struct ResponseIngestObserver {
    exchange: Arc<MessageExchange>,
}

impl MessageObserver for ResponseIngestObserver {
    fn on_message(&self, message: &Message) {
        self.exchange.accept_response(message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DestinationAddress, SourceAddress};
    use messagebus_broker::FakeBroker;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct CountingObserver(Arc<AtomicU32>);
    impl MessageObserver for CountingObserver {
        fn on_message(&self, _message: &Message) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn names() -> QueueNames {
        QueueNames::new("")
    }

    #[tokio::test]
    async fn accepted_request_is_stamped_and_forwarded() {
        let broker: Arc<dyn messagebus_broker::BrokerClient> = Arc::new(FakeBroker::new("in"));
        let receiver = Arc::new(MessageReceiver::new("recv", broker.clone(), "pending:a", Some("processing:a:inst".into()), None));
        let sender = Arc::new(MessageSender::new("send-out", broker.clone(), None));

        let exchange = MessageExchange::new(
            "inst-1",
            names(),
            Some(InboundGroup { requests_in: receiver.clone(), responses_out: sender }),
            None,
            None,
        );

        let count = Arc::new(AtomicU32::new(0));
        exchange.add_request_observer(Arc::new(CountingObserver(count.clone())));
        exchange.enable_messaging().await;

        let message = Message::new_root(
            SourceAddress { instance_id: "caller".into(), route: "domain-a".into() },
            DestinationAddress { instance_id: None, route: "domain-b".into() },
        );
        broker.list_push("pending:a", &serde_json::to_string(&message).unwrap()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        exchange.disable_messaging().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disrupted_connection_is_tracked_and_cleared() {
        let broker = Arc::new(FakeBroker::new("outbound-conn"));
        let broker_dyn: Arc<dyn messagebus_broker::BrokerClient> = broker.clone();
        let receiver = Arc::new(MessageReceiver::new("resp-in", broker_dyn.clone(), "processed:a:inst", None, None));
        let sender = Arc::new(MessageSender::new("outbound-conn", broker_dyn.clone(), None));

        let exchange = MessageExchange::new(
            "inst-1",
            names(),
            None,
            Some(OutboundGroup { requests_out: sender, responses_in: receiver }),
            None,
        );
        exchange.enable_messaging().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        broker.disrupt();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(exchange.is_disrupted("outbound-conn"));

        broker.recover();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!exchange.is_disrupted("outbound-conn"));

        exchange.disable_messaging().await;
    }
}
