//! Assembles outbound service calls, dispatches them, and correlates the
//! eventual response back to the waiting caller.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use messagebus_broker::BrokerClient;
use messagebus_shared::messaging::{MessageDispatcher, MessageObserver};
use messagebus_shared::{
    DestinationAddress, Message, MessageId, ServiceAddress, ServiceCall, ServiceCallError,
    ServiceCallResult, SourceAddress,
};
use tokio::sync::oneshot;
use tracing::warn;

use crate::payload::{RequestPayload, ResponsePayload};

/// Where a call sits in a chain of nested service calls. `root()` starts a
/// fresh chain; a handler issuing a nested call builds one from its own
/// `chain_id`/`chain_level`/current message id.
#[derive(Debug, Clone, Default)]
pub struct ChainContext {
    pub chain_id: Option<String>,
    pub chain_level: u32,
    pub predecessor: Option<MessageId>,
}

impl ChainContext {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn nested(chain_id: impl Into<String>, chain_level: u32, predecessor: MessageId) -> Self {
        Self {
            chain_id: Some(chain_id.into()),
            chain_level,
            predecessor: Some(predecessor),
        }
    }
}

/// An in-flight call, kept around past the point the request is sent so its
/// `ServiceCall` survives to be stamped by [`ServiceCaller::on_message`] when
/// the matching response arrives.
struct PendingCall {
    call: ServiceCall,
    tx: oneshot::Sender<ServiceCall>,
}

pub struct ServiceCaller {
    self_instance_id: String,
    self_domain: String,
    broker: Arc<dyn BrokerClient>,
    registry_prefix: String,
    timeout: Duration,
    pending: DashMap<MessageId, PendingCall>,
}

impl std::fmt::Debug for ServiceCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCaller")
            .field("self_instance_id", &self.self_instance_id)
            .field("self_domain", &self.self_domain)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl ServiceCaller {
    pub fn new(
        self_instance_id: impl Into<String>,
        self_domain: impl Into<String>,
        broker: Arc<dyn BrokerClient>,
        registry_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_instance_id: self_instance_id.into(),
            self_domain: self_domain.into(),
            broker,
            registry_prefix: registry_prefix.into(),
            timeout,
            pending: DashMap::new(),
        })
    }

    /// Resolves the target against the service registry, sends the request,
    /// and waits for the matching response up to `timeout`. Never returns an
    /// `Err`: every failure is folded into `ServiceCallResult::failure`.
    pub async fn execute_service_call(
        self: &Arc<Self>,
        dispatcher: &MessageDispatcher,
        service_address: ServiceAddress,
        service_params: serde_json::Map<String, serde_json::Value>,
        auth_token: String,
        chain: ChainContext,
    ) -> ServiceCallResult {
        if let Err(exception) = self.check_registry(&service_address).await {
            return ServiceCallResult::failure(exception);
        }

        let mut call = self.assemble_call(service_address, service_params, auth_token, chain);

        call.message.payload = match serde_json::to_value(RequestPayload {
            auth_token: call.auth_token.clone(),
            service_address: call.service_address.clone(),
            service_params: call.service_params.clone(),
        }) {
            Ok(value) => Some(value),
            Err(err) => {
                return ServiceCallResult::failure(ServiceCallError::HandlerFailed(format!(
                    "failed to encode request payload: {err}"
                )))
            }
        };

        let message_id = match dispatcher.send_request(&mut call.message).await {
            Ok(id) => id,
            Err(err) => {
                return ServiceCallResult::failure(ServiceCallError::HandlerFailed(err.to_string()))
            }
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(message_id.clone(), PendingCall { call, tx });

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(completed)) => completed.result.unwrap_or_else(|| {
                ServiceCallResult::failure(ServiceCallError::HandlerFailed(
                    "completed call carries no result".to_string(),
                ))
            }),
            Ok(Err(_)) => ServiceCallResult::failure(ServiceCallError::HandlerFailed(
                "pending response channel closed".to_string(),
            )),
            Err(_) => {
                // Not completed: the handler was never invoked, so
                // `isCompleted` stays false on the dropped `ServiceCall`.
                self.pending.remove(&message_id);
                ServiceCallResult::failure(ServiceCallError::ServiceExecTimeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn check_registry(&self, address: &ServiceAddress) -> Result<(), ServiceCallError> {
        let key = format!("{}{}", self.registry_prefix, address.service_domain_name);
        let registered = self
            .broker
            .set_is_member(&key, &address.service_alias)
            .await
            .unwrap_or(false);
        if registered {
            Ok(())
        } else {
            Err(ServiceCallError::ServiceNotRegistered {
                domain: address.service_domain_name.clone(),
                alias: address.service_alias.clone(),
            })
        }
    }

    fn assemble_call(
        &self,
        service_address: ServiceAddress,
        service_params: serde_json::Map<String, serde_json::Value>,
        auth_token: String,
        chain: ChainContext,
    ) -> ServiceCall {
        let chain_id = chain.chain_id.unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let chain_level = chain.chain_level;
        let predecessor = chain.predecessor;

        let message = Message {
            message_id: MessageId::new(),
            chain_id,
            chain_level,
            source: SourceAddress {
                instance_id: self.self_instance_id.clone(),
                route: self.self_domain.clone(),
            },
            destination: DestinationAddress {
                instance_id: None,
                route: service_address.service_domain_name.clone(),
            },
            payload: None,
            sequence: 0,
            hash: None,
        };

        ServiceCall {
            message,
            auth_token,
            service_address,
            service_params,
            predecessor,
            successors: Vec::new(),
            created_on: chrono::Utc::now(),
            finished_on: None,
            execution_time_ms: None,
            is_completed: false,
            result: None,
        }
    }
}

impl MessageObserver for ServiceCaller {
    /// Matches an incoming response's `message_id` to a pending call,
    /// removing it exactly once, stamps `finishedOn`/`executionTime`/
    /// `isCompleted` on its `ServiceCall`, and hands the completed call back
    /// to the waiter.
    fn on_message(&self, message: &Message) {
        let Some((_, pending)) = self.pending.remove(&message.message_id) else {
            warn!(message_id = %message.message_id, "late or unmatched response, dropping");
            return;
        };
        let PendingCall { mut call, tx } = pending;

        let result = match &message.payload {
            Some(payload) => match serde_json::from_value::<ResponsePayload>(payload.clone()) {
                Ok(decoded) => decoded.result,
                Err(err) => ServiceCallResult::failure(ServiceCallError::HandlerFailed(format!(
                    "failed to decode response payload: {err}"
                ))),
            },
            None => ServiceCallResult::failure(ServiceCallError::HandlerFailed(
                "response carried no payload".to_string(),
            )),
        };

        call.complete(result);
        let _ = tx.send(call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messagebus_broker::FakeBroker;
    use messagebus_shared::messaging::{MessageExchange, OutboundGroup};
    use messagebus_shared::messaging::{MessageDispatcher as Dispatcher, MessageReceiver, MessageSender};
    use messagebus_shared::queues::QueueNames;

    struct Harness {
        broker: Arc<FakeBroker>,
        dispatcher: Arc<Dispatcher>,
        caller: Arc<ServiceCaller>,
        pending_queue: String,
    }

    async fn harness(timeout: Duration) -> Harness {
        let broker = Arc::new(FakeBroker::new("caller-test"));
        let broker_dyn: Arc<dyn BrokerClient> = broker.clone();
        let queues = QueueNames::new("");

        let self_domain = "caller-domain";
        let self_instance = "caller-1";
        let processed_queue = queues.processed(self_domain, self_instance).unwrap();
        let pending_queue = queues.pending("billing").unwrap();

        let requests_out = Arc::new(MessageSender::new("req-out", broker_dyn.clone(), None));
        let responses_in = Arc::new(MessageReceiver::new(
            "resp-in",
            broker_dyn.clone(),
            processed_queue.as_str(),
            None,
            None,
        ));

        let exchange = MessageExchange::new(
            self_instance,
            queues,
            None,
            Some(OutboundGroup { requests_out, responses_in }),
            None,
        );
        let dispatcher = Dispatcher::initialize(exchange, None, None).await;

        let caller = ServiceCaller::new(self_instance, self_domain, broker_dyn, "registry:", timeout);
        dispatcher.add_message_observer_responses_in(caller.clone());

        Harness { broker, dispatcher, caller, pending_queue }
    }

    fn respond_ok(message: &Message) -> (String, String) {
        let mut response = message.clone();
        response.source = SourceAddress {
            instance_id: message.destination.instance_id.clone().unwrap_or_default(),
            route: message.destination.route.clone(),
        };
        response.destination = DestinationAddress {
            instance_id: Some(message.source.instance_id.clone()),
            route: message.source.route.clone(),
        };
        response.sequence += 1;
        response.payload = Some(
            serde_json::to_value(ResponsePayload {
                result: ServiceCallResult::success(Some(serde_json::json!({"ok": true}))),
            })
            .unwrap(),
        );
        let queue = format!("processed:{}:{}", response.destination.route, response.destination.instance_id.clone().unwrap());
        (queue, serde_json::to_string(&response).unwrap())
    }

    #[tokio::test]
    async fn happy_path_resolves_via_matched_response() {
        let h = harness(Duration::from_millis(500)).await;
        h.broker.set_add("registry:billing", "charge").await.unwrap();

        let responder_broker: Arc<dyn BrokerClient> = h.broker.clone();
        let pending_queue = h.pending_queue.clone();
        let responder = tokio::spawn(async move {
            let raw = responder_broker
                .list_pop_tail_blocking(&pending_queue, 5)
                .await
                .unwrap()
                .expect("request should arrive");
            let message: Message = serde_json::from_str(&raw).unwrap();
            let (queue, body) = respond_ok(&message);
            responder_broker.list_push(&queue, &body).await.unwrap();
        });

        let result = h
            .caller
            .execute_service_call(
                h.dispatcher.as_ref(),
                ServiceAddress::new("billing", "charge"),
                serde_json::Map::new(),
                "token".to_string(),
                ChainContext::root(),
            )
            .await;

        responder.await.unwrap();
        assert!(result.is_successful);
        assert!(result.exception.is_none());
    }

    #[tokio::test]
    async fn unregistered_service_fails_without_sending() {
        let h = harness(Duration::from_millis(200)).await;

        let result = h
            .caller
            .execute_service_call(
                h.dispatcher.as_ref(),
                ServiceAddress::new("billing", "charge"),
                serde_json::Map::new(),
                "token".to_string(),
                ChainContext::root(),
            )
            .await;

        assert!(!result.is_successful);
        assert!(matches!(
            result.exception,
            Some(ServiceCallError::ServiceNotRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn no_response_times_out() {
        let h = harness(Duration::from_millis(50)).await;
        h.broker.set_add("registry:billing", "charge").await.unwrap();

        let result = h
            .caller
            .execute_service_call(
                h.dispatcher.as_ref(),
                ServiceAddress::new("billing", "charge"),
                serde_json::Map::new(),
                "token".to_string(),
                ChainContext::root(),
            )
            .await;

        assert!(!result.is_successful);
        assert!(matches!(
            result.exception,
            Some(ServiceCallError::ServiceExecTimeout { .. })
        ));
        assert_eq!(h.caller.pending.len(), 0);
    }
}
