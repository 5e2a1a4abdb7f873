//! Attestation chain export and the key attestation record.
//!
//! The chain bound to the signing key is exported as PEM certificates in
//! store order (leaf first). The leaf certificate carries a key attestation
//! extension ([`KeyDescription`]) that records the challenge supplied at key
//! creation and the security level the key lives in.

use crate::der;
use crate::error::{FingerprintError, FingerprintResult};
use crate::key_manager::KeyLease;
use auroprint_core::KeyTier;
use serde::{Deserialize, Serialize};
use tracing::debug;
use x509_parser::prelude::{FromDer, X509Certificate};

/// OID of the Android key attestation extension (1.3.6.1.4.1.11129.2.1.17).
pub const ANDROID_KEY_ATTESTATION_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 11129, 2, 1, 17];

const PEM_CERTIFICATE: &str = "CERTIFICATE";
const PEM_PUBLIC_KEY: &str = "PUBLIC KEY";

/// Leading fields of the KeyDescription attestation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescription {
    pub attestation_version: u32,
    pub attestation_security_level: KeyTier,
    pub attestation_challenge: Vec<u8>,
}

impl KeyDescription {
    /// Encode as a KeyDescription SEQUENCE with empty authorization lists.
    pub fn to_der(&self) -> Vec<u8> {
        let level = u64::from(self.attestation_security_level.security_level());
        let version = u64::from(self.attestation_version);

        let mut body = Vec::new();
        body.extend(der::write_unsigned(der::TAG_INTEGER, version));
        body.extend(der::write_unsigned(der::TAG_ENUMERATED, level));
        // keymaster/keymint version and security level mirror the attestation ones
        body.extend(der::write_unsigned(der::TAG_INTEGER, version));
        body.extend(der::write_unsigned(der::TAG_ENUMERATED, level));
        body.extend(der::write_tlv(der::TAG_OCTET_STRING, &self.attestation_challenge));
        body.extend(der::write_tlv(der::TAG_OCTET_STRING, &[]));
        body.extend(der::write_tlv(der::TAG_SEQUENCE, &[]));
        body.extend(der::write_tlv(der::TAG_SEQUENCE, &[]));
        der::write_tlv(der::TAG_SEQUENCE, &body)
    }

    /// Parse the leading fields of a KeyDescription. Authorization lists are skipped.
    pub fn from_der(input: &[u8]) -> Result<Self, String> {
        let (_, body) = der::read_sequence(input)?;
        let (body, attestation_version) = der::read_integer(body)?;
        let (body, security_level) = der::read_enumerated(body)?;
        let (body, _keymint_version) = der::read_integer(body)?;
        let (body, _keymint_security_level) = der::read_enumerated(body)?;
        let (_, challenge) = der::read_octet_string(body)?;

        let attestation_security_level = KeyTier::from_security_level(security_level)
            .ok_or_else(|| format!("unknown security level {security_level}"))?;
        let attestation_version = u32::try_from(attestation_version)
            .map_err(|_| format!("attestation version out of range: {attestation_version}"))?;

        Ok(Self {
            attestation_version,
            attestation_security_level,
            attestation_challenge: challenge.to_vec(),
        })
    }
}

/// Public key and certificate chain of the signing key, PEM-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedAttestation {
    /// SubjectPublicKeyInfo of the leaf certificate
    pub public_key_pem: String,
    /// Certificates in store order, leaf first
    pub chain_pem: Vec<String>,
}

/// Export the certificate chain bound to the leased key.
///
/// An empty chain is an error: a bundle without a verifiable public key
/// would be incomplete.
pub fn export_chain(lease: &KeyLease<'_>) -> FingerprintResult<ExportedAttestation> {
    let alias = lease.alias();
    let chain = lease
        .store()
        .certificate_chain(alias)
        .map_err(|e| FingerprintError::AttestationExport {
            alias: alias.to_string(),
            reason: e.to_string(),
        })?;

    let leaf = chain.first().ok_or_else(|| FingerprintError::AttestationExport {
        alias: alias.to_string(),
        reason: "certificate chain is empty".to_string(),
    })?;
    let spki = leaf_public_key_der(leaf).map_err(|reason| FingerprintError::AttestationExport {
        alias: alias.to_string(),
        reason,
    })?;

    debug!(alias, certificates = chain.len(), "attestation chain exported");
    Ok(ExportedAttestation {
        public_key_pem: pem_encode(PEM_PUBLIC_KEY, &spki),
        chain_pem: chain.iter().map(|cert| certificate_to_pem(cert)).collect(),
    })
}

/// True only if the platform advertises attestation capability and the
/// leased key's own attestation record places it in a hardware tier. A
/// missing chain, record or parse error yields false. Never fails.
pub fn is_hardware_backed(lease: &KeyLease<'_>) -> bool {
    if !lease.store().attestation_supported() {
        return false;
    }
    let alias = lease.alias();
    let chain = match lease.store().certificate_chain(alias) {
        Ok(chain) => chain,
        Err(e) => {
            debug!(alias, error = %e, "no attestation chain");
            return false;
        }
    };
    let Some(leaf) = chain.first() else {
        return false;
    };
    match key_description(leaf) {
        Ok(Some(description)) => description.attestation_security_level.is_hardware(),
        Ok(None) => {
            debug!(alias, "leaf carries no attestation record");
            false
        }
        Err(reason) => {
            debug!(alias, %reason, "unreadable attestation record");
            false
        }
    }
}

/// PEM-encode a DER certificate (64-column body, LF line endings).
pub fn certificate_to_pem(cert_der: &[u8]) -> String {
    pem_encode(PEM_CERTIFICATE, cert_der)
}

fn pem_encode(tag: &str, contents: &[u8]) -> String {
    let config = pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF);
    let mut encoded = pem::encode_config(&pem::Pem::new(tag, contents.to_vec()), config);
    encoded.truncate(encoded.trim_end().len());
    encoded
}

/// SubjectPublicKeyInfo DER of a certificate.
pub fn leaf_public_key_der(cert_der: &[u8]) -> Result<Vec<u8>, String> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| format!("X.509 parse failure: {e}"))?;
    Ok(cert.public_key().raw.to_vec())
}

/// Key attestation record of a certificate, if it carries one.
pub fn key_description(cert_der: &[u8]) -> Result<Option<KeyDescription>, String> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| format!("X.509 parse failure: {e}"))?;

    let extension = cert.extensions().iter().find(|ext| {
        ext.oid
            .iter()
            .map(|arcs| arcs.eq(ANDROID_KEY_ATTESTATION_OID.iter().copied()))
            .unwrap_or(false)
    });

    extension
        .map(|ext| KeyDescription::from_der(ext.value))
        .transpose()
}
