pub mod caller;
pub mod payload;

pub use caller::{ChainContext, ServiceCaller};
pub use payload::{RequestPayload, ResponsePayload};
