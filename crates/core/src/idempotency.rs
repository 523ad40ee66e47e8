//! Idempotency keys for engagement events.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::RawEvent;

/// Upper bound on caller-supplied keys.
pub const MAX_KEY_LEN: usize = 256;

/// Fresh key for an outbound send. Generated once per lead dispatch so that
/// retries of the same send share it.
pub fn fresh_key() -> String {
    Uuid::new_v4().to_string()
}

/// Deterministic key for a callback that arrived without one. Provider
/// redeliveries of the same callback hash to the same key.
pub fn derive_key(raw: &RawEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.campaign_id.as_bytes());
    hasher.update(raw.lead_id.as_bytes());
    hasher.update(raw.channel.as_str().as_bytes());
    hasher.update(raw.kind.as_str().as_bytes());
    match &raw.provider_message_id {
        Some(message_id) => hasher.update(message_id.as_bytes()),
        None => hasher.update(raw.occurred_at.timestamp_micros().to_be_bytes()),
    }
    hex::encode(hasher.finalize())
}
