//! Receives request messages from the inbound pipeline, resolves the
//! target handler, authorizes, invokes, and hands the response back to the
//! dispatcher.

use std::sync::Arc;

use dashmap::DashMap;
use messagebus_caller::{RequestPayload, ResponsePayload, ServiceCaller};
use messagebus_shared::messaging::{MessageDispatcher, MessageObserver};
use messagebus_shared::{DestinationAddress, Message, ServiceAddress, ServiceCallError, ServiceCallResult, SourceAddress};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::handler::{AuthorizationHook, ExecContext, ServiceHandler};

pub struct ServiceExecutor {
    owner_instance_id: String,
    service_interface: DashMap<String, DashMap<String, Arc<dyn ServiceHandler>>>,
    auth_hook: Arc<dyn AuthorizationHook>,
    dispatcher: Arc<MessageDispatcher>,
    caller: Arc<ServiceCaller>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ServiceExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceExecutor")
            .field("owner_instance_id", &self.owner_instance_id)
            .field("registered_aliases", &self.service_interface.len())
            .finish_non_exhaustive()
    }
}

impl ServiceExecutor {
    pub fn new(
        owner_instance_id: impl Into<String>,
        auth_hook: Arc<dyn AuthorizationHook>,
        dispatcher: Arc<MessageDispatcher>,
        caller: Arc<ServiceCaller>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            owner_instance_id: owner_instance_id.into(),
            service_interface: DashMap::new(),
            auth_hook,
            dispatcher,
            caller,
            cancel,
        })
    }

    pub fn register_handler(
        &self,
        alias: impl Into<String>,
        version: impl Into<String>,
        handler: Arc<dyn ServiceHandler>,
    ) {
        self.service_interface
            .entry(alias.into())
            .or_default()
            .insert(version.into(), handler);
    }

    /// Register this executor as an observer of the dispatcher's inbound
    /// request pipeline. Call once; calling it again registers a second,
    /// redundant observer.
    pub fn install(self: &Arc<Self>) {
        self.dispatcher
            .add_message_observer_requests_in(Arc::new(ExecutorObserver(self.clone())));
    }

    fn resolve_handler(&self, address: &ServiceAddress) -> Result<Arc<dyn ServiceHandler>, ServiceCallError> {
        let versions = self
            .service_interface
            .get(&address.service_alias)
            .ok_or_else(|| ServiceCallError::ServiceNotFound {
                alias: address.service_alias.clone(),
            })?;

        let version_key = match &address.service_version {
            Some(v) => v.clone(),
            None => versions
                .iter()
                .map(|entry| entry.key().clone())
                .max()
                .ok_or_else(|| ServiceCallError::ServiceHandlerNotFound {
                    alias: address.service_alias.clone(),
                    version: "<none registered>".to_string(),
                })?,
        };

        versions
            .get(&version_key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceCallError::ServiceHandlerNotFound {
                alias: address.service_alias.clone(),
                version: version_key.clone(),
            })
    }

    async fn handle_request(self: Arc<Self>, message: Message) {
        let message_id = message.message_id.clone();

        let Some(payload) = message.payload.clone() else {
            error!(message_id = %message_id, "request carried no payload, dropping");
            return;
        };
        let request: RequestPayload = match serde_json::from_value(payload) {
            Ok(request) => request,
            Err(err) => {
                error!(message_id = %message_id, error = %err, "failed to decode request payload, dropping");
                return;
            }
        };

        let result = self.dispatch_to_handler(&message, &request).await;

        let original_source = message.source.clone();
        let mut response = message;
        response.source = SourceAddress {
            instance_id: self.owner_instance_id.clone(),
            route: response.destination.route.clone(),
        };
        response.destination = DestinationAddress {
            instance_id: Some(original_source.instance_id),
            route: original_source.route,
        };
        response.sequence += 1;
        response.payload = match serde_json::to_value(ResponsePayload { result }) {
            Ok(value) => Some(value),
            Err(err) => {
                error!(message_id = %message_id, error = %err, "failed to encode response payload, dropping");
                return;
            }
        };

        if let Err(err) = self.dispatcher.send_response(&mut response).await {
            warn!(message_id = %message_id, error = %err, "failed to send response");
        }
    }

    async fn dispatch_to_handler(&self, message: &Message, request: &RequestPayload) -> ServiceCallResult {
        if let Err(exception) = self
            .auth_hook
            .verify_access(&request.auth_token, &request.service_address)
            .await
        {
            debug!(message_id = %message.message_id, "access denied");
            return ServiceCallResult::failure(exception);
        }

        let handler = match self.resolve_handler(&request.service_address) {
            Ok(handler) => handler,
            Err(exception) => return ServiceCallResult::failure(exception),
        };

        let context = ExecContext::new(
            message.chain_id.clone(),
            message.chain_level,
            message.message_id.clone(),
            request.auth_token.clone(),
            self.cancel.clone(),
            self.dispatcher.clone(),
            self.caller.clone(),
        );

        match handler.invoke(request.service_params.clone(), context).await {
            Ok(payload) => ServiceCallResult::success(payload),
            Err(exception) => ServiceCallResult::failure(exception),
        }
    }
}

#[derive(Debug)]
struct ExecutorObserver(Arc<ServiceExecutor>);

impl MessageObserver for ExecutorObserver {
    fn on_message(&self, message: &Message) {
        let executor = self.0.clone();
        let message = message.clone();
        tokio::spawn(async move {
            executor.handle_request(message).await;
        });
    }
}
