//! Fingerprint bundle returned to callers.

use crate::error::FingerprintResult;
use serde::{Deserialize, Serialize};

/// Signed fingerprint with its supporting key material. Field names are
/// stable; downstream verification tooling depends on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintBundle {
    pub device_id: String,
    /// Serialized payload, exactly the signed bytes
    pub payload: String,
    /// Base64 RSA/SHA-256/PKCS#1 v1.5 signature over `payload`
    pub signature: String,
    pub public_key_pem: String,
    /// PEM certificates, leaf first
    pub attestation_chain: Vec<String>,
    /// Unix seconds, same value as in the payload
    pub timestamp: u64,
    pub nonce: String,
    pub is_hardware_backed: bool,
}

impl FingerprintBundle {
    pub fn to_json(&self) -> FingerprintResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> FingerprintResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
