//! Payload signing with the managed key.

use crate::error::{FingerprintError, FingerprintResult};
use crate::key_manager::KeyLease;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// Sign `payload` with the leased key (RSA / SHA-256 / PKCS#1 v1.5).
///
/// Returns the signature as single-line base64. A key that vanished or that
/// the store refuses to use yields [`FingerprintError::Signing`].
pub fn sign(lease: &KeyLease<'_>, payload: &[u8]) -> FingerprintResult<String> {
    let alias = lease.alias();
    let signature = lease
        .store()
        .sign(alias, payload)
        .map_err(|source| FingerprintError::Signing {
            alias: alias.to_string(),
            source,
        })?;
    debug!(alias, signature_len = signature.len(), "payload signed");
    Ok(STANDARD.encode(signature))
}
