//! Error types for Auroprint fingerprint operations.
//!
//! Key store failures are reported by the store as [`KeyStoreError`] and
//! wrapped with the alias and operation that failed. Device signal failures
//! never reach this type; see [`crate::device::SignalError`].

use auroprint_core::KeyTier;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a secure key store backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyStoreError {
    /// No key exists under the alias
    #[error("no key under alias '{alias}'")]
    NotFound { alias: String },

    /// The store refused the operation (revoked, locked, policy)
    #[error("operation rejected for alias '{alias}': {reason}")]
    Rejected { alias: String, reason: String },

    /// Any other backend failure
    #[error("key store backend error: {0}")]
    Backend(String),
}

/// Stage of fingerprint generation, reported when generation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    KeyProvisioning,
    PayloadSerialization,
    Signing,
    AttestationExport,
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GenerationStage::KeyProvisioning => "key_provisioning",
            GenerationStage::PayloadSerialization => "payload_serialization",
            GenerationStage::Signing => "signing",
            GenerationStage::AttestationExport => "attestation_export",
        })
    }
}

/// Errors that can occur in fingerprint and integrity token operations.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// Every configured tier reported the capability as unavailable
    #[error("no key tier available for alias '{alias}' (tried: {tried:?})")]
    NoTierAvailable { alias: String, tried: Vec<KeyTier> },

    /// The key could not be created, looked up or deleted
    #[error("key unavailable for alias '{alias}': {source}")]
    KeyUnavailable {
        alias: String,
        #[source]
        source: KeyStoreError,
    },

    /// The store failed to sign with the managed key
    #[error("signing failed for alias '{alias}': {source}")]
    Signing {
        alias: String,
        #[source]
        source: KeyStoreError,
    },

    /// The attestation chain could not be read or encoded
    #[error("attestation export failed for alias '{alias}': {reason}")]
    AttestationExport { alias: String, reason: String },

    /// The remote integrity service rejected or failed the request
    #[error("integrity service error: {0}")]
    IntegrityService(String),

    /// Token negotiation exceeded the configured bound
    #[error("integrity token request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller supplied an unusable request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] auroprint_core::CoreError),

    /// Fingerprint generation failed; `stage` names where
    #[error("fingerprint generation failed during {stage}: {source}")]
    Generation {
        stage: GenerationStage,
        #[source]
        source: Box<FingerprintError>,
    },
}

impl FingerprintError {
    pub(crate) fn at(stage: GenerationStage) -> impl FnOnce(FingerprintError) -> FingerprintError {
        move |source| FingerprintError::Generation {
            stage,
            source: Box::new(source),
        }
    }

    /// Stage at which fingerprint generation failed, if this is a generation error.
    pub fn stage(&self) -> Option<GenerationStage> {
        match self {
            FingerprintError::Generation { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Result type for fingerprint operations.
pub type FingerprintResult<T> = Result<T, FingerprintError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn generation_error_names_stage_and_keeps_cause() {
        let err = FingerprintError::at(GenerationStage::Signing)(FingerprintError::Signing {
            alias: "k".to_string(),
            source: KeyStoreError::NotFound {
                alias: "k".to_string(),
            },
        });

        assert_eq!(err.stage(), Some(GenerationStage::Signing));
        assert!(err.to_string().contains("during signing"));
        let cause = err.source().unwrap();
        assert!(cause.source().unwrap().to_string().contains("no key under alias"));
    }
}
