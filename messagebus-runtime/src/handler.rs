//! Handler and authorization contracts a consumer of this crate implements,
//! plus the execution context handed to a running handler.

use std::sync::Arc;

use async_trait::async_trait;
use messagebus_caller::{ChainContext, ServiceCaller};
use messagebus_shared::messaging::MessageDispatcher;
use messagebus_shared::{MessageId, ServiceAddress, ServiceCallError, ServiceCallResult};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Business logic registered under a service alias + version. Implementors
/// are supplied by the process embedding this crate, never by the bus
/// itself.
#[async_trait]
pub trait ServiceHandler: Send + Sync + std::fmt::Debug {
    async fn invoke(
        &self,
        params: Map<String, Value>,
        context: ExecContext,
    ) -> Result<Option<Value>, ServiceCallError>;
}

/// Pluggable access check run before a handler is invoked. The one `dyn`
/// trait object in this crate — this hook is genuinely swappable business
/// behavior, unlike the bus's internal plumbing.
#[async_trait]
pub trait AuthorizationHook: Send + Sync + std::fmt::Debug {
    async fn verify_access(
        &self,
        auth_token: &str,
        address: &ServiceAddress,
    ) -> Result<(), ServiceCallError>;
}

/// Grants all access unconditionally. Useful as a default and in tests.
#[derive(Debug, Default)]
pub struct AllowAllAuthorization;

#[async_trait]
impl AuthorizationHook for AllowAllAuthorization {
    async fn verify_access(
        &self,
        _auth_token: &str,
        _address: &ServiceAddress,
    ) -> Result<(), ServiceCallError> {
        Ok(())
    }
}

/// Carries chain position, the original auth token, and everything a
/// handler needs to issue a nested service call that inherits `chainID`,
/// carries `predecessor = currentMessageID`, and increments `chainLevel`.
#[derive(Clone)]
pub struct ExecContext {
    pub chain_id: String,
    pub chain_level: u32,
    pub current_message_id: MessageId,
    pub auth_token: String,
    pub cancel: CancellationToken,
    dispatcher: Arc<MessageDispatcher>,
    caller: Arc<ServiceCaller>,
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("chain_id", &self.chain_id)
            .field("chain_level", &self.chain_level)
            .field("current_message_id", &self.current_message_id)
            .finish_non_exhaustive()
    }
}

impl ExecContext {
    pub fn new(
        chain_id: String,
        chain_level: u32,
        current_message_id: MessageId,
        auth_token: String,
        cancel: CancellationToken,
        dispatcher: Arc<MessageDispatcher>,
        caller: Arc<ServiceCaller>,
    ) -> Self {
        Self {
            chain_id,
            chain_level,
            current_message_id,
            auth_token,
            cancel,
            dispatcher,
            caller,
        }
    }

    /// Issue a nested service call one level deeper in the same chain.
    pub async fn call_service(
        &self,
        service_address: ServiceAddress,
        service_params: Map<String, Value>,
    ) -> ServiceCallResult {
        let chain = ChainContext::nested(
            self.chain_id.clone(),
            self.chain_level + 1,
            self.current_message_id.clone(),
        );
        self.caller
            .execute_service_call(
                self.dispatcher.as_ref(),
                service_address,
                service_params,
                self.auth_token.clone(),
                chain,
            )
            .await
    }
}
