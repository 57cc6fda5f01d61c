//! Instance lifecycle: `preStart → onStart → postStart → running →
//! preStop → onStop → postStop`, specialized into `ConsumerInstance`
//! (outbound dispatch only) and `ProviderInstance` (inbound + outbound,
//! hosting a [`ServiceExecutor`]).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use messagebus_broker::BrokerClient;
use messagebus_caller::{ChainContext, ServiceCaller};
use messagebus_shared::config::BusConfig;
use messagebus_shared::messaging::{
    InboundGroup, MessageDispatcher, MessageExchange, MessageReceiver, MessageSender, OutboundGroup,
};
use messagebus_shared::queues::QueueNames;
use messagebus_shared::resilience::CircuitBreakerBehavior;
use messagebus_shared::tracer::MessageTracer;
use messagebus_shared::{ServiceAddress, ServiceCallResult};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::executor::ServiceExecutor;
use crate::handler::AuthorizationHook;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Constructed,
    Running,
    Stopped,
}

/// Fields and behavior shared by `ConsumerInstance` and `ProviderInstance`.
/// `dispatcher`/`caller`/`health_key` are populated once, during `start()`
/// (`onStart`/`preStart`), and read many times afterward — `OnceCell` gives
/// set-once-read-many without a lock on the hot path.
pub struct InstanceCore {
    instance_name: String,
    instance_id: String,
    broker: Arc<dyn BrokerClient>,
    config: BusConfig,
    state: Mutex<LifecycleState>,
    health_key: OnceCell<String>,
    dispatcher: OnceCell<Arc<MessageDispatcher>>,
    caller: OnceCell<Arc<ServiceCaller>>,
    cancel: CancellationToken,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for InstanceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCore")
            .field("instance_name", &self.instance_name)
            .field("instance_id", &self.instance_id)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl InstanceCore {
    fn new(instance_name: impl Into<String>, instance_id: impl Into<String>, broker: Arc<dyn BrokerClient>, config: BusConfig) -> Self {
        Self {
            instance_name: instance_name.into(),
            instance_id: instance_id.into(),
            broker,
            config,
            state: Mutex::new(LifecycleState::Constructed),
            health_key: OnceCell::new(),
            dispatcher: OnceCell::new(),
            caller: OnceCell::new(),
            cancel: CancellationToken::new(),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    fn hash_key(&self) -> Option<Vec<u8>> {
        if self.config.message_exchange.security_hash_enabled {
            Some(self.config.message_exchange.security_hash_key.as_bytes().to_vec())
        } else {
            None
        }
    }

    /// `preStart`: derive the health-check key this instance will heartbeat
    /// under.
    fn pre_start(&self) {
        let key = format!(
            "{}{}:{}",
            self.config.service_health.check_address, self.instance_name, self.instance_id
        );
        // OnceCell::set only fails if already set, which cannot happen since
        // `start()` runs preStart exactly once.
        let _ = self.health_key.set(key);
    }

    /// `postStart`: schedule the heartbeat and log readiness.
    fn post_start(self: &Arc<Self>) {
        let core = self.clone();
        let interval = Duration::from_secs(self.config.service_health.check_interval.max(1));
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => core.heartbeat_once().await,
                }
            }
        });
        *self.heartbeat.lock() = Some(handle);
        *self.state.lock() = LifecycleState::Running;
        info!(instance_name = %self.instance_name, instance_id = %self.instance_id, "instance ready");
    }

    async fn heartbeat_once(&self) {
        let Some(key) = self.health_key.get() else {
            return;
        };
        let now = Utc::now().to_rfc3339();
        if let Err(err) = self.broker.hash_set(key, "heartbeat", &now).await {
            warn!(key, error = %err, "heartbeat write failed");
            return;
        }
        let timeout = self.config.service_health.check_timeout as i64;
        if let Err(err) = self.broker.expire(key, timeout).await {
            warn!(key, error = %err, "heartbeat expiry refresh failed");
        }
    }

    /// `preStop`: cancel the heartbeat schedule first, per the shutdown
    /// ordering the dispatcher/caller and broker teardown must follow.
    async fn pre_stop(&self) {
        self.cancel.cancel();
        let handle = self.heartbeat.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn post_stop(&self) {
        *self.state.lock() = LifecycleState::Stopped;
        info!(instance_name = %self.instance_name, instance_id = %self.instance_id, "instance stopped");
    }
}

/// Outbound-only instance: initializes the dispatcher with an outbound
/// exchange group and proxies `call_service` to a `ServiceCaller`.
pub struct ConsumerInstance {
    core: Arc<InstanceCore>,
}

impl std::fmt::Debug for ConsumerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerInstance").field("core", &self.core).finish()
    }
}

impl ConsumerInstance {
    pub fn new(
        instance_name: impl Into<String>,
        instance_id: impl Into<String>,
        broker: Arc<dyn BrokerClient>,
        config: BusConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: Arc::new(InstanceCore::new(instance_name, instance_id, broker, config)),
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.core.state()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.core.cancel.clone()
    }

    /// `onStart`: build an outbound-only exchange and initialize the
    /// dispatcher and caller over it.
    async fn on_start(&self, breaker: Option<Arc<dyn CircuitBreakerBehavior>>) {
        let core = &self.core;
        let queue_names = QueueNames::new(core.config.message_exchange.queue_prefix.clone());
        let hash_key = core.hash_key();

        let processed_queue = queue_names
            .processed(&core.instance_name, &core.instance_id)
            .expect("instance identity must be a valid queue segment");

        let broker_dyn = core.broker.clone();
        let requests_out = Arc::new(MessageSender::new(
            format!("{}:requests-out", core.instance_id),
            broker_dyn.clone(),
            hash_key.clone(),
        ));
        let responses_in = Arc::new(MessageReceiver::new(
            format!("{}:responses-in", core.instance_id),
            broker_dyn.clone(),
            processed_queue,
            None,
            hash_key,
        ));

        let tracer = Arc::new(MessageTracer::new(core.broker.clone(), core.config.message_exchange.clone()));
        let exchange = MessageExchange::new(
            core.instance_id.clone(),
            queue_names,
            None,
            Some(OutboundGroup { requests_out, responses_in }),
            Some(tracer.clone()),
        );
        let dispatcher = MessageDispatcher::initialize(exchange, Some(tracer), breaker).await;

        let caller = ServiceCaller::new(
            core.instance_id.clone(),
            core.instance_name.clone(),
            core.broker.clone(),
            core.config.service_registry.address.clone(),
            Duration::from_millis(core.config.service_execution.timeout),
        );
        dispatcher.add_message_observer_responses_in(caller.clone());

        let _ = core.dispatcher.set(dispatcher);
        let _ = core.caller.set(caller);
    }

    pub async fn start(self: &Arc<Self>) {
        self.core.pre_start();
        self.on_start(None).await;
        self.core.post_start();
    }

    pub async fn stop(&self) {
        self.core.pre_stop().await;
        if let Some(dispatcher) = self.core.dispatcher.get() {
            dispatcher.shut_down().await;
        }
        self.core.post_stop();
    }

    pub async fn call_service(
        &self,
        address: ServiceAddress,
        params: Map<String, Value>,
        auth_token: String,
    ) -> ServiceCallResult {
        let (Some(dispatcher), Some(caller)) = (self.core.dispatcher.get(), self.core.caller.get()) else {
            error!("call_service invoked before the instance finished starting");
            return ServiceCallResult::failure(
                messagebus_shared::ServiceCallError::HandlerFailed("instance not started".to_string()),
            );
        };
        caller
            .execute_service_call(dispatcher.as_ref(), address, params, auth_token, ChainContext::root())
            .await
    }
}

/// Inbound + outbound instance hosting a `ServiceExecutor` on the request
/// pipeline, built on top of a `ConsumerInstance`'s outbound half.
pub struct ProviderInstance {
    consumer: Arc<ConsumerInstance>,
    auth_hook: Arc<dyn AuthorizationHook>,
    executor: OnceCell<Arc<ServiceExecutor>>,
}

impl std::fmt::Debug for ProviderInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderInstance").field("consumer", &self.consumer).finish()
    }
}

impl ProviderInstance {
    pub fn new(
        instance_name: impl Into<String>,
        instance_id: impl Into<String>,
        broker: Arc<dyn BrokerClient>,
        config: BusConfig,
        auth_hook: Arc<dyn AuthorizationHook>,
    ) -> Arc<Self> {
        Arc::new(Self {
            consumer: ConsumerInstance::new(instance_name, instance_id, broker, config),
            auth_hook,
            executor: OnceCell::new(),
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.consumer.state()
    }

    pub fn executor(&self) -> Option<Arc<ServiceExecutor>> {
        self.executor.get().cloned()
    }

    pub async fn register_handler(
        &self,
        alias: impl Into<String>,
        version: impl Into<String>,
        handler: Arc<dyn crate::handler::ServiceHandler>,
    ) {
        if let Some(executor) = self.executor.get() {
            executor.register_handler(alias, version, handler);
        } else {
            warn!("register_handler called before the provider instance started; handler ignored");
        }
    }

    /// `onStart`: everything `ConsumerInstance` does, plus an inbound group
    /// and a `ServiceExecutor` registered as the RequestsIn observer.
    async fn on_start(self: &Arc<Self>) {
        let core = &self.consumer.core;
        let queue_names = QueueNames::new(core.config.message_exchange.queue_prefix.clone());
        let hash_key = core.hash_key();

        let pending_queue = queue_names
            .pending(&core.instance_name)
            .expect("instance identity must be a valid queue segment");
        let processing_queue = queue_names
            .processing(&core.instance_name, &core.instance_id)
            .expect("instance identity must be a valid queue segment");

        let broker_dyn = core.broker.clone();
        let requests_in = Arc::new(MessageReceiver::new(
            format!("{}:requests-in", core.instance_id),
            broker_dyn.clone(),
            pending_queue,
            Some(processing_queue),
            hash_key.clone(),
        ));
        let responses_out = Arc::new(MessageSender::new(
            format!("{}:responses-out", core.instance_id),
            broker_dyn.clone(),
            hash_key.clone(),
        ));

        let processed_queue = queue_names
            .processed(&core.instance_name, &core.instance_id)
            .expect("instance identity must be a valid queue segment");
        let requests_out = Arc::new(MessageSender::new(
            format!("{}:requests-out", core.instance_id),
            broker_dyn.clone(),
            hash_key.clone(),
        ));
        let responses_in = Arc::new(MessageReceiver::new(
            format!("{}:responses-in", core.instance_id),
            broker_dyn.clone(),
            processed_queue,
            None,
            hash_key,
        ));

        let tracer = Arc::new(MessageTracer::new(core.broker.clone(), core.config.message_exchange.clone()));
        let exchange = MessageExchange::new(
            core.instance_id.clone(),
            queue_names,
            Some(InboundGroup { requests_in, responses_out }),
            Some(OutboundGroup { requests_out, responses_in }),
            Some(tracer.clone()),
        );
        let dispatcher = MessageDispatcher::initialize(exchange, Some(tracer), None).await;

        let caller = ServiceCaller::new(
            core.instance_id.clone(),
            core.instance_name.clone(),
            core.broker.clone(),
            core.config.service_registry.address.clone(),
            Duration::from_millis(core.config.service_execution.timeout),
        );
        dispatcher.add_message_observer_responses_in(caller.clone());

        let executor = ServiceExecutor::new(
            core.instance_id.clone(),
            self.auth_hook.clone(),
            dispatcher.clone(),
            caller.clone(),
            core.cancel.clone(),
        );
        executor.install();

        let _ = core.dispatcher.set(dispatcher);
        let _ = core.caller.set(caller);
        let _ = self.executor.set(executor);
    }

    pub async fn start(self: &Arc<Self>) {
        self.consumer.core.pre_start();
        self.on_start().await;
        self.consumer.core.post_start();
    }

    pub async fn stop(&self) {
        self.consumer.stop().await;
    }

    pub async fn call_service(
        &self,
        address: ServiceAddress,
        params: Map<String, Value>,
        auth_token: String,
    ) -> ServiceCallResult {
        self.consumer.call_service(address, params, auth_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{AllowAllAuthorization, ServiceHandler};
    use async_trait::async_trait;
    use messagebus_broker::FakeBroker;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl ServiceHandler for Echo {
        async fn invoke(&self, params: Map<String, Value>, _context: ExecContext) -> Result<Option<Value>, messagebus_shared::ServiceCallError> {
            Ok(Some(Value::Object(params)))
        }
    }

    fn test_config() -> BusConfig {
        let mut config = BusConfig::default();
        config.service_health.check_interval = 5;
        config.service_health.check_timeout = 15;
        config
    }

    #[tokio::test]
    async fn consumer_lifecycle_reaches_running_then_stopped() {
        let broker = Arc::new(FakeBroker::new("instance-test"));
        let consumer = ConsumerInstance::new("billing", "billing-1", broker, test_config());
        assert_eq!(consumer.state(), LifecycleState::Constructed);

        consumer.start().await;
        assert_eq!(consumer.state(), LifecycleState::Running);

        consumer.stop().await;
        assert_eq!(consumer.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn consumer_call_service_fails_against_unregistered_target() {
        let broker = Arc::new(FakeBroker::new("instance-test"));
        let consumer = ConsumerInstance::new("billing", "billing-1", broker, test_config());
        consumer.start().await;

        let result = consumer
            .call_service(ServiceAddress::new("orders", "charge"), Map::new(), "token".to_string())
            .await;

        assert!(!result.is_successful);
        consumer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn provider_heartbeat_writes_health_key_on_schedule() {
        let broker = Arc::new(FakeBroker::new("instance-test"));
        let broker_dyn: Arc<dyn BrokerClient> = broker.clone();
        let provider = ProviderInstance::new(
            "orders",
            "orders-1",
            broker_dyn,
            test_config(),
            Arc::new(AllowAllAuthorization),
        );
        provider.start().await;

        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        let value = broker.hash_get("health:orders:orders-1", "heartbeat").await.unwrap();
        assert!(value.is_some());

        provider.stop().await;
    }

    #[tokio::test]
    async fn provider_serves_a_registered_handler_end_to_end() {
        let broker = Arc::new(FakeBroker::new("instance-test"));
        let provider = ProviderInstance::new(
            "orders",
            "orders-1",
            broker.clone(),
            test_config(),
            Arc::new(AllowAllAuthorization),
        );
        provider.start().await;
        provider.register_handler("charge", "1.0", Arc::new(Echo)).await;
        broker.set_add("registry:orders", "charge").await.unwrap();

        let mut params = Map::new();
        params.insert("amount".to_string(), serde_json::json!(7));
        let result = provider
            .call_service(ServiceAddress::new("orders", "charge"), params.clone(), "token".to_string())
            .await;

        assert!(result.is_successful);
        assert_eq!(result.payload, Some(Value::Object(params)));
        provider.stop().await;
    }
}
