//! # Message Handler
//!
//! `MessageHandlerBase` carries the fields common to every handler variant:
//! a connection identifier, an availability flag, and an observer list.
//! Concrete variants ([`MessageSender`][super::sender::MessageSender],
//! [`MessageReceiver`][super::receiver::MessageReceiver]) compose this base
//! rather than inheriting from it — composition over a trait-object
//! hierarchy where the polymorphism isn't load-bearing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::model::Message;

/// Receives fan-out from a [`MessageHandlerBase`].
///
/// Delivery is in registration order, best-effort: a panic or error from
/// one observer must never prevent the others from being notified.
pub trait MessageObserver: Send + Sync + std::fmt::Debug {
    fn on_message(&self, message: &Message);
    fn on_connection_disrupted(&self, identifier: &str) {
        let _ = identifier;
    }
    fn on_connection_recovered(&self, identifier: &str) {
        let _ = identifier;
    }
}

/// Fields and behavior common to every message handler variant.
#[derive(Debug)]
pub struct MessageHandlerBase {
    identifier: String,
    available: AtomicBool,
    observers: RwLock<Vec<Arc<dyn MessageObserver>>>,
}

impl MessageHandlerBase {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            available: AtomicBool::new(true),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Registers an observer in call order; later `notify_*` calls preserve
    /// that order.
    pub async fn add_observer(&self, observer: Arc<dyn MessageObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Fan out a received message to every observer, swallowing whatever an
    /// individual observer does (a panic inside `on_message` is caught via
    /// `catch_unwind` so one bad observer cannot drop the rest).
    pub async fn notify_message(&self, message: &Message) {
        let observers = self.observers.read().await;
        for observer in observers.iter() {
            let observer = observer.clone();
            let message = message.clone();
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer.on_message(&message)))
            {
                warn!(identifier = %self.identifier, panic = ?panic, "observer panicked on_message");
            }
        }
    }

    pub async fn notify_disrupted(&self) {
        self.set_available(false);
        let observers = self.observers.read().await;
        for observer in observers.iter() {
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                observer.on_connection_disrupted(&self.identifier)
            })) {
                warn!(identifier = %self.identifier, panic = ?panic, "observer panicked on_connection_disrupted");
            }
        }
    }

    pub async fn notify_recovered(&self) {
        self.set_available(true);
        let observers = self.observers.read().await;
        for observer in observers.iter() {
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                observer.on_connection_recovered(&self.identifier)
            })) {
                warn!(identifier = %self.identifier, panic = ?panic, "observer panicked on_connection_recovered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug)]
    struct CountingObserver {
        count: Arc<AtomicU32>,
        panics: bool,
    }

    impl MessageObserver for CountingObserver {
        fn on_message(&self, _message: &Message) {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.panics {
                panic!("boom");
            }
        }
    }

    #[tokio::test]
    async fn fan_out_notifies_all_observers_in_order_despite_panic() {
        let base = MessageHandlerBase::new("conn-1");
        let first_count = Arc::new(AtomicU32::new(0));
        let second_count = Arc::new(AtomicU32::new(0));

        base.add_observer(Arc::new(CountingObserver {
            count: first_count.clone(),
            panics: true,
        }))
        .await;
        base.add_observer(Arc::new(CountingObserver {
            count: second_count.clone(),
            panics: false,
        }))
        .await;

        let message = Message::new_root(
            crate::model::SourceAddress {
                instance_id: "a".into(),
                route: "domain-a".into(),
            },
            crate::model::DestinationAddress {
                instance_id: None,
                route: "domain-b".into(),
            },
        );

        base.notify_message(&message).await;

        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn availability_flips_on_disruption_and_recovery() {
        let base = MessageHandlerBase::new("conn-1");
        assert!(base.is_available());
        base.notify_disrupted().await;
        assert!(!base.is_available());
        base.notify_recovered().await;
        assert!(base.is_available());
    }
}
