//! Secure key store capability consumed by the fingerprint core.
//!
//! The store owns private key material. Callers address keys by alias and
//! only ever ask the store to sign, export certificates or delete.

use crate::error::KeyStoreError;
use auroprint_core::KeyTier;
use serde::{Deserialize, Serialize};

/// Asymmetric algorithm of the signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    Rsa,
}

/// Signature digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Digest {
    Sha256,
}

/// Signature padding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignaturePadding {
    Pkcs1v15,
}

/// Parameters for creating a signing key in a specific tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyGenSpec {
    pub algorithm: KeyAlgorithm,
    pub key_size: usize,
    pub digest: Digest,
    pub padding: SignaturePadding,
    /// Whether each use of the key requires user presence
    pub user_authentication_required: bool,
    /// Requested protection tier
    pub tier: KeyTier,
    /// Challenge embedded in the key attestation record
    pub attestation_challenge: Vec<u8>,
}

impl KeyGenSpec {
    /// RSA-2048 / SHA-256 / PKCS#1 v1.5 signing key with no user-presence gate.
    pub fn signing(tier: KeyTier, attestation_challenge: Vec<u8>) -> Self {
        Self {
            algorithm: KeyAlgorithm::Rsa,
            key_size: 2048,
            digest: Digest::Sha256,
            padding: SignaturePadding::Pkcs1v15,
            user_authentication_required: false,
            tier,
            attestation_challenge,
        }
    }
}

/// Handle to a key held by the store. Carries no private material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeyHandle {
    pub alias: String,
    pub tier: KeyTier,
    pub attestation_challenge: Vec<u8>,
}

/// Outcome of a single tier creation attempt.
#[derive(Debug)]
pub enum KeyCreation {
    /// Key created in the requested tier
    Created(SigningKeyHandle),
    /// The requested tier does not exist on this device
    CapabilityUnavailable,
    /// The tier exists but creation failed
    Failed(KeyStoreError),
}

/// Process-wide secure key store.
///
/// Implementations must tolerate external mutation: a key may disappear
/// between calls, which is reported as [`KeyStoreError::NotFound`].
pub trait SecureKeyStore: Send + Sync {
    /// Whether a key exists under `alias`.
    fn contains(&self, alias: &str) -> Result<bool, KeyStoreError>;

    /// Create a key under `alias` following `spec`.
    fn create(&self, alias: &str, spec: &KeyGenSpec) -> KeyCreation;

    /// Delete the key under `alias`. Deleting a missing key is not an error.
    fn delete(&self, alias: &str) -> Result<(), KeyStoreError>;

    /// DER certificates bound to `alias`, leaf first.
    fn certificate_chain(&self, alias: &str) -> Result<Vec<Vec<u8>>, KeyStoreError>;

    /// Sign `data` with the key under `alias` using the key's digest and padding.
    fn sign(&self, alias: &str, data: &[u8]) -> Result<Vec<u8>, KeyStoreError>;

    /// Whether the platform can produce hardware key attestation at all.
    fn attestation_supported(&self) -> bool;
}
