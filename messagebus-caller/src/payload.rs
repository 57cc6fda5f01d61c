//! Wire shapes carried in `Message::payload` for the request/response legs
//! of a `ServiceCall`.
//!
//! `Message` itself only carries the generic envelope (ids, addresses,
//! sequence, hash); the call-specific fields travel as JSON inside
//! `payload`, symmetrically encoded/decoded by the caller and the executor.

use serde::{Deserialize, Serialize};
use serde_json::Map;

use messagebus_shared::{ServiceAddress, ServiceCallResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    pub auth_token: String,
    pub service_address: ServiceAddress,
    pub service_params: Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub result: ServiceCallResult,
}
