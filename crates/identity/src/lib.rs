//! Signed device fingerprints for the Auroprint system.
//!
//! This crate derives a stable device identifier from platform signals, signs
//! it with a non-exportable key held by a secure key store, and returns the
//! signature together with the key's attestation chain so a remote party can
//! check both the payload and where the key lives.
//!
//! # Core Concepts
//!
//! - **Key Manager**: Ensures the signing key exists, walking the configured
//!   key tiers from most to least secure
//! - **Device Identifier**: SHA-256 over DRM id, hardware descriptors and display
//! - **Fingerprint Bundle**: Payload, signature, public key and attestation chain
//! - **Integrity Token**: Opaque token from a remote attestation service
//!
//! # Security Model
//!
//! - Private key material never leaves the key store
//! - Every bundle carries a fresh 128-bit nonce and its generation time
//! - Signing and chain export for one alias are serialized per key manager

pub mod attestation;
pub mod bundle;
pub(crate) mod der;
pub mod device;
pub mod error;
pub mod host_signals;
pub mod integrity;
pub mod key_manager;
pub mod keystore;
pub mod payload;
pub mod service;
pub mod signer;
pub mod software_keystore;
pub mod verify;

pub use attestation::{ExportedAttestation, KeyDescription, ANDROID_KEY_ATTESTATION_OID};
pub use bundle::FingerprintBundle;
pub use device::{
    derive_device_id, DerivedDeviceId, DeviceSignalSource, DisplayMetrics, HardwareDescriptors,
    SignalError, SignalKind, StaticDeviceSignals,
};
pub use error::{FingerprintError, FingerprintResult, GenerationStage, KeyStoreError};
pub use host_signals::HostDeviceSignals;
pub use integrity::{
    pending_token, IntegrityService, IntegrityTokenClient, IntegrityTokenRequest,
    LocalIntegrityService, PendingToken, TokenCompleter, TokenStatus,
};
pub use key_manager::{KeyLease, KeyManager, KeyStatus};
pub use keystore::{KeyCreation, KeyGenSpec, SecureKeyStore, SigningKeyHandle};
pub use payload::FingerprintPayload;
pub use service::FingerprintService;
pub use software_keystore::SoftwareKeyStore;
pub use verify::{BundleVerification, BundleVerificationFailure, BundleVerifier};

// Re-export core types for convenience
pub use auroprint_core::{Config, KeyTier};
