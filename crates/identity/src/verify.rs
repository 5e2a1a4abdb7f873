//! Consumer-side verification of fingerprint bundles.
//!
//! A bundle verifies when its chain parses and every certificate is signed
//! by its successor up to a self-signed root, the leaf carries an
//! attestation record, the advertised public key is the leaf's, the
//! signature checks over the exact payload bytes, and the payload agrees
//! with the bundle's own fields.

use crate::attestation::{self, KeyDescription};
use crate::bundle::FingerprintBundle;
use crate::payload::FingerprintPayload;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Why a bundle failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleVerificationFailure {
    EmptyCertificateChain,
    CertificateParseFailure(String),
    /// A certificate's issuer is not the subject of the next one
    CertificateChainBroken { position: usize },
    /// The certificate at `position` is not signed by its issuer's key
    CertificateSignatureInvalid { position: usize },
    CertificateChainUntrusted,
    PublicKeyMismatch,
    MissingAttestationExtension,
    MalformedAttestationExtension(String),
    SignatureEncoding,
    SignatureInvalid,
    PayloadMalformed(String),
    /// A payload field disagrees with the bundle field of the same meaning
    PayloadMismatch(&'static str),
}

/// Outcome of [`BundleVerifier::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleVerification {
    pub verified: bool,
    /// Attestation record of the leaf, when present and parseable
    pub key_description: Option<KeyDescription>,
    pub failure: Option<BundleVerificationFailure>,
}

impl BundleVerification {
    fn failed(
        failure: BundleVerificationFailure,
        key_description: Option<KeyDescription>,
    ) -> Self {
        Self {
            verified: false,
            key_description,
            failure: Some(failure),
        }
    }
}

/// Verifies bundles, optionally pinning the chain to known roots.
#[derive(Debug, Clone, Default)]
pub struct BundleVerifier {
    trusted_roots: Vec<Vec<u8>>,
}

impl BundleVerifier {
    /// Verifier that accepts any self-consistent chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the last certificate of the chain to be one of `roots` (DER).
    pub fn trusting(roots: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            trusted_roots: roots.into_iter().collect(),
        }
    }

    pub fn verify(&self, bundle: &FingerprintBundle) -> BundleVerification {
        use BundleVerificationFailure as Failure;

        if bundle.attestation_chain.is_empty() {
            return BundleVerification::failed(Failure::EmptyCertificateChain, None);
        }
        let chain_der = match decode_pem_chain(&bundle.attestation_chain) {
            Ok(chain) => chain,
            Err(reason) => {
                return BundleVerification::failed(Failure::CertificateParseFailure(reason), None)
            }
        };
        let parsed = match parse_der_chain(&chain_der) {
            Ok(parsed) => parsed,
            Err(reason) => {
                return BundleVerification::failed(Failure::CertificateParseFailure(reason), None)
            }
        };

        if let Some(position) = broken_link(&parsed) {
            return BundleVerification::failed(Failure::CertificateChainBroken { position }, None);
        }
        if let Some(position) = unsigned_link(&parsed) {
            return BundleVerification::failed(
                Failure::CertificateSignatureInvalid { position },
                None,
            );
        }
        if !self.trusted_roots.is_empty() {
            let trusted = chain_der
                .last()
                .map(|root| self.trusted_roots.iter().any(|t| t == root))
                .unwrap_or(false);
            if !trusted {
                return BundleVerification::failed(Failure::CertificateChainUntrusted, None);
            }
        }

        let leaf_spki = parsed[0].public_key().raw;
        match pem::parse(&bundle.public_key_pem) {
            Ok(advertised) if advertised.contents() == leaf_spki => {}
            _ => return BundleVerification::failed(Failure::PublicKeyMismatch, None),
        }

        let key_description = match attestation::key_description(&chain_der[0]) {
            Ok(Some(description)) => Some(description),
            Ok(None) => {
                return BundleVerification::failed(Failure::MissingAttestationExtension, None)
            }
            Err(reason) => {
                return BundleVerification::failed(
                    Failure::MalformedAttestationExtension(reason),
                    None,
                )
            }
        };

        let message = bundle.payload.as_bytes();
        if let Err(failure) = verify_signature(&bundle.signature, message, leaf_spki) {
            return BundleVerification::failed(failure, key_description);
        }

        if let Err(failure) = check_payload(bundle) {
            return BundleVerification::failed(failure, key_description);
        }

        BundleVerification {
            verified: true,
            key_description,
            failure: None,
        }
    }
}

/// Check a base64 RSA/SHA-256/PKCS#1 v1.5 signature against a DER
/// SubjectPublicKeyInfo.
pub fn verify_signature(
    signature_b64: &str,
    message: &[u8],
    spki_der: &[u8],
) -> Result<(), BundleVerificationFailure> {
    let signature = STANDARD
        .decode(signature_b64)
        .map_err(|_| BundleVerificationFailure::SignatureEncoding)?;
    let public_key = RsaPublicKey::from_public_key_der(spki_der).map_err(|e| {
        BundleVerificationFailure::CertificateParseFailure(format!("invalid RSA public key: {e}"))
    })?;
    public_key
        .verify(
            Pkcs1v15Sign::new::<Sha256>(),
            &Sha256::digest(message),
            &signature,
        )
        .map_err(|_| BundleVerificationFailure::SignatureInvalid)
}

fn check_payload(bundle: &FingerprintBundle) -> Result<(), BundleVerificationFailure> {
    let payload = FingerprintPayload::from_signing_str(&bundle.payload)
        .map_err(|e| BundleVerificationFailure::PayloadMalformed(e.to_string()))?;
    if payload.device_id() != bundle.device_id {
        return Err(BundleVerificationFailure::PayloadMismatch("deviceId"));
    }
    if payload.timestamp() != bundle.timestamp {
        return Err(BundleVerificationFailure::PayloadMismatch("timestamp"));
    }
    if payload.nonce() != bundle.nonce {
        return Err(BundleVerificationFailure::PayloadMismatch("nonce"));
    }
    Ok(())
}

fn decode_pem_chain(chain: &[String]) -> Result<Vec<Vec<u8>>, String> {
    chain
        .iter()
        .enumerate()
        .map(|(i, cert)| {
            let parsed = pem::parse(cert).map_err(|e| format!("certificate {i}: {e}"))?;
            if parsed.tag() != "CERTIFICATE" {
                return Err(format!("certificate {i}: unexpected PEM tag {}", parsed.tag()));
            }
            Ok(parsed.into_contents())
        })
        .collect()
}

fn parse_der_chain(chain: &[Vec<u8>]) -> Result<Vec<X509Certificate<'_>>, String> {
    chain
        .iter()
        .map(|cert| {
            X509Certificate::from_der(cert)
                .map(|(_, parsed)| parsed)
                .map_err(|e| format!("X.509 parse failure: {e}"))
        })
        .collect()
}

/// Index of the first certificate not issued by its successor.
fn broken_link(chain: &[X509Certificate<'_>]) -> Option<usize> {
    chain
        .windows(2)
        .position(|pair| pair[0].issuer().as_raw() != pair[1].subject().as_raw())
}

/// Index of the first certificate whose signature does not check against
/// its issuer's key. The last certificate must be self-signed.
fn unsigned_link(chain: &[X509Certificate<'_>]) -> Option<usize> {
    chain.iter().enumerate().position(|(i, cert)| {
        let issuer_key = chain.get(i + 1).map(|issuer| issuer.public_key());
        cert.verify_signature(issuer_key).is_err()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chain_fails_first() {
        let bundle = FingerprintBundle {
            device_id: "d".to_string(),
            payload: r#"{"did":"d","ts":1,"nonce":"n"}"#.to_string(),
            signature: String::new(),
            public_key_pem: String::new(),
            attestation_chain: Vec::new(),
            timestamp: 1,
            nonce: "n".to_string(),
            is_hardware_backed: false,
        };
        let outcome = BundleVerifier::new().verify(&bundle);
        assert!(!outcome.verified);
        assert_eq!(
            outcome.failure,
            Some(BundleVerificationFailure::EmptyCertificateChain)
        );
    }

    fn self_signed(common_name: &str) -> (rcgen::KeyPair, rcgen::Certificate) {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, common_name);
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        (key, cert)
    }

    fn bundle_over(chain: &[&[u8]]) -> FingerprintBundle {
        let leaf_spki = attestation::leaf_public_key_der(chain[0]).unwrap();
        FingerprintBundle {
            device_id: "d".to_string(),
            payload: r#"{"did":"d","ts":1,"nonce":"n"}"#.to_string(),
            signature: String::new(),
            public_key_pem: pem::encode(&pem::Pem::new("PUBLIC KEY", leaf_spki)),
            attestation_chain: chain
                .iter()
                .map(|der| attestation::certificate_to_pem(der))
                .collect(),
            timestamp: 1,
            nonce: "n".to_string(),
            is_hardware_backed: false,
        }
    }

    #[test]
    fn leaf_without_attestation_record_is_rejected() {
        let (_, cert) = self_signed("Plain Certificate");
        let outcome = BundleVerifier::new().verify(&bundle_over(&[&cert.der()[..]]));
        assert!(!outcome.verified);
        assert_eq!(outcome.key_description, None);
        assert_eq!(
            outcome.failure,
            Some(BundleVerificationFailure::MissingAttestationExtension)
        );
    }

    #[test]
    fn chain_must_end_in_a_self_signed_certificate() {
        let (ca_key, ca_cert) = self_signed("Issuing Authority");
        let leaf_key = rcgen::KeyPair::generate().unwrap();
        let leaf = rcgen::CertificateParams::new(vec!["leaf".to_string()])
            .unwrap()
            .signed_by(&leaf_key, &ca_cert, &ca_key)
            .unwrap();

        let outcome = BundleVerifier::new().verify(&bundle_over(&[&leaf.der()[..]]));
        assert_eq!(
            outcome.failure,
            Some(BundleVerificationFailure::CertificateSignatureInvalid { position: 0 })
        );
    }

    #[test]
    fn non_pem_chain_is_a_parse_failure() {
        assert!(decode_pem_chain(&["garbage".to_string()]).is_err());
    }

    #[test]
    fn undecodable_signature_is_reported() {
        assert_eq!(
            verify_signature("***", b"m", b"k"),
            Err(BundleVerificationFailure::SignatureEncoding)
        );
    }
}
