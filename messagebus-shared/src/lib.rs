//! # Message Bus Shared
//!
//! Data model, message handler family, exchange, dispatcher, tracer, config,
//! and error taxonomy shared by `messagebus-caller` and `messagebus-runtime`.

pub mod config;
pub mod errors;
pub mod hash;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod queues;
pub mod resilience;
pub mod tracer;

pub use errors::{MessagingError, MessagingResult, ServiceCallError};
pub use model::{
    DestinationAddress, DispatchEvent, Message, MessageId, MessageKind, MessageState,
    ServiceAddress, ServiceCall, ServiceCallResult, SourceAddress, TraceEntry,
};
