//! # Broker Client
//!
//! Thin capability surface over the memory-cache broker that backs the
//! message bus. This crate knows nothing about `Message`,
//! `ServiceCall`, queues-as-a-naming-scheme, or any other application
//! concept — those live in `messagebus-shared`.

pub mod client;
pub mod error;
pub mod events;
pub mod redis_broker;
pub mod retry;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

pub use client::{BrokerClient, BrokerCommand};
pub use error::{BrokerError, BrokerResult};
pub use events::ConnectionEvent;
pub use redis_broker::{RedisBroker, RedisBrokerConfig};
pub use retry::LinkRetryConfig;

#[cfg(any(test, feature = "test-utils"))]
pub use fake::FakeBroker;
