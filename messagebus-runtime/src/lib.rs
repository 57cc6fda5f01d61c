//! Service executor and instance lifecycle layered on top of
//! `messagebus-shared`'s dispatcher/exchange and `messagebus-caller`'s
//! outbound call path.

pub mod executor;
pub mod handler;
pub mod instance;

pub use executor::ServiceExecutor;
pub use handler::{AllowAllAuthorization, AuthorizationHook, ExecContext, ServiceHandler};
pub use instance::{ConsumerInstance, LifecycleState, ProviderInstance};
