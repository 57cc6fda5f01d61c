//! # Queue Naming
//!
//! Bit-exact queue naming scheme, split into a free function for the
//! validation contract and a small struct driven by configuration for the
//! naming itself.

use crate::errors::MessagingError;

/// Reject control characters and path-unsafe segments before a
/// caller-supplied domain string becomes part of a broker key.
pub fn validate_queue_name(name: &str) -> Result<(), MessagingError> {
    let is_valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-'));
    if is_valid {
        Ok(())
    } else {
        Err(MessagingError::AbstractContract(format!(
            "invalid queue name segment: {name:?}"
        )))
    }
}

/// Queue name routing for pending/processing/processed queues. Kept as a
/// struct rather than a trait — there is exactly one naming scheme in use,
/// so the indirection of a trait buys nothing yet.
#[derive(Debug, Clone)]
pub struct QueueNames {
    prefix: String,
}

impl QueueNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// `<prefix>pending:<domain>` — requests awaiting any instance of `domain`.
    pub fn pending(&self, domain: &str) -> Result<String, MessagingError> {
        validate_queue_name(domain)?;
        Ok(format!("{}pending:{}", self.prefix, domain))
    }

    /// `<prefix>processing:<domain>:<instance_id>` — in-flight requests on a
    /// specific instance.
    pub fn processing(&self, domain: &str, instance_id: &str) -> Result<String, MessagingError> {
        validate_queue_name(domain)?;
        validate_queue_name(instance_id)?;
        Ok(format!("{}processing:{}:{}", self.prefix, domain, instance_id))
    }

    /// `<prefix>processed:<domain>:<instance_id>` — responses destined for a
    /// specific instance of `domain`.
    pub fn processed(&self, domain: &str, instance_id: &str) -> Result<String, MessagingError> {
        validate_queue_name(domain)?;
        validate_queue_name(instance_id)?;
        Ok(format!("{}processed:{}:{}", self.prefix, domain, instance_id))
    }
}
