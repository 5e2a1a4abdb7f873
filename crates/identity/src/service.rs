//! Fingerprint service: the public operations over injected collaborators.

use crate::attestation;
use crate::bundle::FingerprintBundle;
use crate::device::{derive_device_id, DerivedDeviceId, DeviceSignalSource};
use crate::error::{FingerprintError, FingerprintResult, GenerationStage};
use crate::integrity::{IntegrityService, IntegrityTokenClient};
use crate::key_manager::{KeyManager, KeyStatus};
use crate::keystore::SecureKeyStore;
use crate::payload::FingerprintPayload;
use crate::signer;
use auroprint_core::Config;
use std::sync::Arc;
use tracing::{debug, info};

/// Generates fingerprint bundles, resets the signing key and negotiates
/// integrity tokens. All operations block the calling thread.
#[derive(Clone)]
pub struct FingerprintService {
    keys: KeyManager,
    store: Arc<dyn SecureKeyStore>,
    signals: Arc<dyn DeviceSignalSource>,
    integrity: IntegrityTokenClient,
}

impl std::fmt::Debug for FingerprintService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintService")
            .field("keys", &self.keys)
            .field("integrity", &self.integrity)
            .finish_non_exhaustive()
    }
}

impl FingerprintService {
    pub fn new(
        store: Arc<dyn SecureKeyStore>,
        signals: Arc<dyn DeviceSignalSource>,
        integrity: Arc<dyn IntegrityService>,
        config: &Config,
    ) -> FingerprintResult<Self> {
        config.validate()?;
        Ok(Self {
            keys: KeyManager::new(store.clone(), &config.keys),
            store,
            signals,
            integrity: IntegrityTokenClient::new(integrity, config.integrity.timeout()),
        })
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    /// Produce a fresh, fully signed bundle. Fails with
    /// [`FingerprintError::Generation`] naming the failing stage; a partial
    /// bundle is never returned.
    pub fn generate_fingerprint(&self) -> FingerprintResult<FingerprintBundle> {
        let lease = self
            .keys
            .lease()
            .map_err(FingerprintError::at(GenerationStage::KeyProvisioning))?;
        if let KeyStatus::Created(handle) = lease.status() {
            debug!(tier = %handle.tier, "fingerprint uses newly created key");
        }

        let derived = self.derive_device_id();
        let payload = FingerprintPayload::build(derived.device_id.clone());
        let serialized = payload
            .to_signing_string()
            .map_err(FingerprintError::at(GenerationStage::PayloadSerialization))?;

        let signature = signer::sign(&lease, serialized.as_bytes())
            .map_err(FingerprintError::at(GenerationStage::Signing))?;
        let exported = attestation::export_chain(&lease)
            .map_err(FingerprintError::at(GenerationStage::AttestationExport))?;
        let is_hardware_backed = attestation::is_hardware_backed(&lease);
        drop(lease);

        info!(
            is_hardware_backed,
            chain_len = exported.chain_pem.len(),
            omitted_signals = ?derived.omitted,
            "fingerprint generated"
        );

        Ok(FingerprintBundle {
            device_id: derived.device_id,
            timestamp: payload.timestamp(),
            nonce: payload.nonce().to_string(),
            payload: serialized,
            signature,
            public_key_pem: exported.public_key_pem,
            attestation_chain: exported.chain_pem,
            is_hardware_backed,
        })
    }

    /// Delete the signing key; the next generation creates a new one.
    pub fn reset_key(&self) -> FingerprintResult<()> {
        self.keys.reset().map(|_| ())
    }

    /// Negotiate an integrity token bound to `nonce`. Project scoping is sent
    /// only when `cloud_project_number` is positive.
    pub fn request_integrity_token(
        &self,
        nonce: &str,
        cloud_project_number: i64,
    ) -> FingerprintResult<String> {
        self.integrity.request_token(nonce, cloud_project_number)
    }

    /// Device identifier from the current signals.
    pub fn derive_device_id(&self) -> DerivedDeviceId {
        derive_device_id(self.signals.as_ref())
    }

    /// Whether the platform offers hardware key attestation at all.
    pub fn is_hardware_backed_available(&self) -> bool {
        self.store.attestation_supported()
    }
}
