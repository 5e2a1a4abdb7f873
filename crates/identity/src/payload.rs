//! Fingerprint payload construction.
//!
//! The payload binds the device identifier to the generation time and a
//! fresh 128-bit nonce. It serializes as compact JSON with the keys `did`,
//! `ts`, `nonce` in that order, and these are the exact bytes that get signed.

use crate::error::FingerprintResult;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Nonce length in bytes (rendered as twice as many hex characters).
pub const NONCE_LEN: usize = 16;

/// Signed fingerprint payload. Field order is the serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintPayload {
    #[serde(rename = "did")]
    device_id: String,
    ts: u64,
    nonce: String,
}

impl FingerprintPayload {
    /// Payload for `device_id` stamped with the current time and a fresh nonce.
    pub fn build(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ts: unix_seconds(),
            nonce: generate_nonce(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Unix seconds at construction.
    pub fn timestamp(&self) -> u64 {
        self.ts
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Deterministic serialized form; these bytes are what gets signed.
    pub fn to_signing_string(&self) -> FingerprintResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a serialized payload, e.g. when verifying a bundle.
    pub fn from_signing_str(payload: &str) -> FingerprintResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// 128 random bits as 32 lowercase hex characters.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn serializes_in_fixed_field_order() {
        let payload = FingerprintPayload {
            device_id: "abc".to_string(),
            ts: 1_700_000_000,
            nonce: "00112233445566778899aabbccddeeff".to_string(),
        };
        assert_eq!(
            payload.to_signing_string().unwrap(),
            r#"{"did":"abc","ts":1700000000,"nonce":"00112233445566778899aabbccddeeff"}"#
        );
        assert_eq!(
            FingerprintPayload::from_signing_str(&payload.to_signing_string().unwrap()).unwrap(),
            payload
        );
    }

    #[test]
    fn nonce_is_32_lowercase_hex() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn no_nonce_collision_in_10k_draws() {
        let draws: HashSet<String> = (0..10_000).map(|_| generate_nonce()).collect();
        assert_eq!(draws.len(), 10_000);
    }

    #[test]
    fn build_stamps_current_time() {
        let before = unix_seconds();
        let payload = FingerprintPayload::build("device");
        assert_eq!(payload.device_id(), "device");
        assert!(payload.timestamp() >= before && payload.timestamp() <= unix_seconds());
        assert_ne!(payload.nonce(), FingerprintPayload::build("device").nonce());
    }
}
