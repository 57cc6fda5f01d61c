//! # Integrity Hashing
//!
//! `hash` is computed over the message's serialized form minus `hash`
//! itself, keyed with `MESSAGE_EXCHANGE_SECURITY_HASH_KEY`. HMAC-SHA256 is
//! the standard choice for keyed message integrity and is already present
//! in the broader pack's dependency stack (`sha2`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::model::Message;

type HmacSha256 = Hmac<Sha256>;

/// Compute the integrity hash for `message`, which must have `hash == None`
/// at the time of computation.
pub fn compute_hash(message: &Message, key: &[u8]) -> String {
    debug_assert!(message.hash.is_none(), "hash must be stripped before signing");
    let canonical = serde_json::to_vec(message).expect("Message serialization cannot fail");
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&canonical);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify `message.hash` against a freshly computed hash over the message
/// with `hash` stripped. Returns `false` on tampering.
pub fn verify_hash(message: &mut Message, key: &[u8]) -> bool {
    let Some(expected) = message.hash.take() else {
        return false;
    };
    let actual = compute_hash(message, key);
    actual == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DestinationAddress, SourceAddress};

    fn sample_message() -> Message {
        Message::new_root(
            SourceAddress {
                instance_id: "inst-a".into(),
                route: "domain-a".into(),
            },
            DestinationAddress {
                instance_id: None,
                route: "domain-b".into(),
            },
        )
    }

    #[test]
    fn hash_round_trips() {
        let key = b"secret";
        let mut message = sample_message();
        let hash = compute_hash(&message, key);
        message.hash = Some(hash);
        assert!(verify_hash(&mut message, key));
    }

    #[test]
    fn tampering_is_detected() {
        let key = b"secret";
        let mut message = sample_message();
        let hash = compute_hash(&message, key);
        message.hash = Some(hash);
        message.payload = Some(serde_json::json!({"tampered": true}));
        assert!(!verify_hash(&mut message, key));
    }
}
