//! Connection events emitted by a [`BrokerClient`][crate::client::BrokerClient].

/// Emitted when a broker link transitions state.
///
/// `Disrupted` fires when the underlying link errors out; `Recovered` fires
/// once it becomes ready again. The [`MessageExchange`] in `messagebus-shared`
/// tracks these to maintain its disrupted-connections set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Disrupted { identifier: String },
    Recovered { identifier: String },
}

impl ConnectionEvent {
    pub fn identifier(&self) -> &str {
        match self {
            ConnectionEvent::Disrupted { identifier } => identifier,
            ConnectionEvent::Recovered { identifier } => identifier,
        }
    }
}
