//! In-process key store backend.
//!
//! Generates real RSA keys and issues a real attestation chain (leaf signed
//! by a per-store attestation root) so that everything downstream of the
//! store, including consumer-side verification, runs unchanged. Hardware
//! tiers can be emulated to exercise the tier fallback policy on hosts
//! without secure hardware.

use crate::attestation::{KeyDescription, ANDROID_KEY_ATTESTATION_OID};
use crate::error::KeyStoreError;
use crate::keystore::{KeyAlgorithm, KeyCreation, KeyGenSpec, SecureKeyStore, SigningKeyHandle};
use auroprint_core::KeyTier;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DistinguishedName, DnType,
    IsCa, KeyPair, KeyUsagePurpose, RemoteKeyPair, SignatureAlgorithm, PKCS_ECDSA_P256_SHA256,
    PKCS_RSA_SHA256,
};
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

/// Smallest RSA modulus this backend will generate.
const MIN_RSA_KEY_SIZE: usize = 2048;

struct SoftwareKeyRecord {
    private_key: RsaPrivateKey,
    handle: SigningKeyHandle,
    cert_chain: Vec<Vec<u8>>,
    revoked: Option<String>,
}

struct AttestationRoot {
    key: KeyPair,
    cert: Certificate,
}

/// Software key store with optional hardware tier emulation.
pub struct SoftwareKeyStore {
    keys: RwLock<HashMap<String, SoftwareKeyRecord>>,
    available_tiers: Vec<KeyTier>,
    failing_tiers: HashMap<KeyTier, String>,
    root: AttestationRoot,
}

impl std::fmt::Debug for SoftwareKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareKeyStore")
            .field("available_tiers", &self.available_tiers)
            .field("failing_tiers", &self.failing_tiers)
            .finish_non_exhaustive()
    }
}

impl SoftwareKeyStore {
    /// A store that only offers the software tier and no attestation capability.
    pub fn new() -> Result<Self, KeyStoreError> {
        Self::emulating(&[KeyTier::Software])
    }

    /// A store that reports the given tiers as available.
    ///
    /// Attestation capability is advertised when any emulated tier is a
    /// hardware tier.
    pub fn emulating(tiers: &[KeyTier]) -> Result<Self, KeyStoreError> {
        let root = AttestationRoot::generate()?;
        info!(
            tiers = ?tiers,
            "STATUS: SoftwareKeyStore :: Attestation Root :: READY"
        );
        Ok(Self {
            keys: RwLock::new(HashMap::new()),
            available_tiers: tiers.to_vec(),
            failing_tiers: HashMap::new(),
            root,
        })
    }

    /// Make key creation in `tier` fail with a backend error even though the
    /// tier is available.
    pub fn with_failing_tier(mut self, tier: KeyTier, reason: impl Into<String>) -> Self {
        self.failing_tiers.insert(tier, reason.into());
        self
    }

    /// Mark the key under `alias` as revoked; later signing is rejected.
    pub fn revoke(&self, alias: &str, reason: impl Into<String>) -> Result<(), KeyStoreError> {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        let record = keys.get_mut(alias).ok_or_else(|| KeyStoreError::NotFound {
            alias: alias.to_string(),
        })?;
        record.revoked = Some(reason.into());
        Ok(())
    }

    /// Handle of the key under `alias`, if any.
    pub fn handle(&self, alias: &str) -> Option<SigningKeyHandle> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alias)
            .map(|record| record.handle.clone())
    }

    /// DER of the attestation root that signs every leaf in this store.
    pub fn attestation_root_der(&self) -> Vec<u8> {
        self.root.cert.der().to_vec()
    }

    fn generate(&self, alias: &str, spec: &KeyGenSpec) -> Result<SoftwareKeyRecord, KeyStoreError> {
        if spec.algorithm != KeyAlgorithm::Rsa || spec.key_size < MIN_RSA_KEY_SIZE {
            return Err(KeyStoreError::Backend(format!(
                "unsupported key parameters: {:?}/{}",
                spec.algorithm, spec.key_size
            )));
        }

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, spec.key_size)
            .map_err(|e| KeyStoreError::Backend(format!("RSA key generation failed: {e}")))?;

        let leaf = self.issue_leaf(alias, &private_key, spec)?;

        Ok(SoftwareKeyRecord {
            private_key,
            handle: SigningKeyHandle {
                alias: alias.to_string(),
                tier: spec.tier,
                attestation_challenge: spec.attestation_challenge.clone(),
            },
            cert_chain: vec![leaf, self.attestation_root_der()],
            revoked: None,
        })
    }

    fn issue_leaf(
        &self,
        alias: &str,
        private_key: &RsaPrivateKey,
        spec: &KeyGenSpec,
    ) -> Result<Vec<u8>, KeyStoreError> {
        let subject = KeyPair::from_remote(Box::new(RsaSubjectKey::new(private_key.clone())?))
            .map_err(cert_error)?;

        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(cert_error)?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, format!("Auroprint Key {alias}"));
        params.distinguished_name = dn;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];

        let description = KeyDescription {
            attestation_version: 100,
            attestation_security_level: spec.tier,
            attestation_challenge: spec.attestation_challenge.clone(),
        };
        params.custom_extensions = vec![CustomExtension::from_oid_content(
            ANDROID_KEY_ATTESTATION_OID,
            description.to_der(),
        )];

        let cert = params
            .signed_by(&subject, &self.root.cert, &self.root.key)
            .map_err(cert_error)?;
        Ok(cert.der().to_vec())
    }
}

impl SecureKeyStore for SoftwareKeyStore {
    fn contains(&self, alias: &str) -> Result<bool, KeyStoreError> {
        Ok(self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(alias))
    }

    fn create(&self, alias: &str, spec: &KeyGenSpec) -> KeyCreation {
        if !self.available_tiers.contains(&spec.tier) {
            return KeyCreation::CapabilityUnavailable;
        }
        if let Some(reason) = self.failing_tiers.get(&spec.tier) {
            return KeyCreation::Failed(KeyStoreError::Backend(reason.clone()));
        }

        match self.generate(alias, spec) {
            Ok(record) => {
                let handle = record.handle.clone();
                self.keys
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(alias.to_string(), record);
                debug!(alias, tier = %spec.tier, "software key created");
                KeyCreation::Created(handle)
            }
            Err(e) => KeyCreation::Failed(e),
        }
    }

    fn delete(&self, alias: &str) -> Result<(), KeyStoreError> {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(alias);
        Ok(())
    }

    fn certificate_chain(&self, alias: &str) -> Result<Vec<Vec<u8>>, KeyStoreError> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.get(alias)
            .map(|record| record.cert_chain.clone())
            .ok_or_else(|| KeyStoreError::NotFound {
                alias: alias.to_string(),
            })
    }

    fn sign(&self, alias: &str, data: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        let record = keys.get(alias).ok_or_else(|| KeyStoreError::NotFound {
            alias: alias.to_string(),
        })?;
        if let Some(reason) = &record.revoked {
            return Err(KeyStoreError::Rejected {
                alias: alias.to_string(),
                reason: reason.clone(),
            });
        }
        sign_pkcs1v15_sha256(&record.private_key, data)
            .map_err(|e| KeyStoreError::Backend(format!("RSA signing failed: {e}")))
    }

    fn attestation_supported(&self) -> bool {
        self.available_tiers.iter().any(KeyTier::is_hardware)
    }
}

impl AttestationRoot {
    fn generate() -> Result<Self, KeyStoreError> {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(cert_error)?;
        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(cert_error)?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Auroprint Software Attestation Root");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let cert = params.self_signed(&key).map_err(cert_error)?;
        Ok(Self { key, cert })
    }
}

/// Exposes an RSA key to rcgen as the subject key of the leaf certificate.
struct RsaSubjectKey {
    private_key: RsaPrivateKey,
    public_key_der: Vec<u8>,
}

impl RsaSubjectKey {
    fn new(private_key: RsaPrivateKey) -> Result<Self, KeyStoreError> {
        let public_key_der = private_key
            .to_public_key()
            .to_pkcs1_der()
            .map_err(|e| KeyStoreError::Backend(format!("public key encoding failed: {e}")))?
            .as_bytes()
            .to_vec();
        Ok(Self {
            private_key,
            public_key_der,
        })
    }
}

impl RemoteKeyPair for RsaSubjectKey {
    fn public_key(&self) -> &[u8] {
        &self.public_key_der
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        sign_pkcs1v15_sha256(&self.private_key, msg).map_err(|_| rcgen::Error::RemoteKeyError)
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        &PKCS_RSA_SHA256
    }
}

fn sign_pkcs1v15_sha256(key: &RsaPrivateKey, data: &[u8]) -> rsa::Result<Vec<u8>> {
    let digest = Sha256::digest(data);
    key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
}

fn cert_error(e: rcgen::Error) -> KeyStoreError {
    KeyStoreError::Backend(format!("attestation certificate error: {e}"))
}
