//! Signing key lifecycle: tiered creation, leasing and reset.
//!
//! Key creation walks the configured capability tiers strongest first.
//! A tier that reports [`KeyCreation::CapabilityUnavailable`] is skipped; any
//! other failure stops the walk and propagates, so a generic hardware
//! failure never degrades into a weaker key.
//!
//! Every operation on the alias runs under a single lock. Signing and
//! export require a [`KeyLease`], which can only be obtained after
//! [`KeyManager::ensure`] has succeeded under that lock, so a concurrent
//! [`KeyManager::reset`] can never delete the key mid-use.

use crate::error::{FingerprintError, FingerprintResult};
use crate::keystore::{KeyCreation, KeyGenSpec, SecureKeyStore, SigningKeyHandle};
use auroprint_core::{KeyConfig, KeyTier};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Result of [`KeyManager::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStatus {
    /// A key was already present under the alias
    Existing,
    /// A new key was created
    Created(SigningKeyHandle),
}

/// Manages the signing key under one alias.
///
/// Clones share the same alias lock.
#[derive(Clone)]
pub struct KeyManager {
    store: Arc<dyn SecureKeyStore>,
    alias: Arc<str>,
    tiers: Arc<[KeyTier]>,
    challenge_prefix: Arc<str>,
    lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("alias", &self.alias)
            .field("tiers", &self.tiers)
            .finish_non_exhaustive()
    }
}

/// Exclusive use of the managed key. Holds the alias lock until dropped.
pub struct KeyLease<'a> {
    _guard: MutexGuard<'a, ()>,
    manager: &'a KeyManager,
    status: KeyStatus,
}

impl<'a> KeyLease<'a> {
    pub fn alias(&self) -> &'a str {
        &self.manager.alias
    }

    pub fn store(&self) -> &'a dyn SecureKeyStore {
        self.manager.store.as_ref()
    }

    /// Whether the key was found or created when the lease was taken.
    pub fn status(&self) -> &KeyStatus {
        &self.status
    }
}

impl KeyManager {
    pub fn new(store: Arc<dyn SecureKeyStore>, config: &KeyConfig) -> Self {
        Self {
            store,
            alias: config.alias.as_str().into(),
            tiers: config.tiers.as_slice().into(),
            challenge_prefix: config.challenge_prefix.as_str().into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Create the key if it does not exist. No-op otherwise.
    pub fn ensure(&self) -> FingerprintResult<KeyStatus> {
        let _guard = self.lock();
        self.ensure_locked()
    }

    /// Ensure the key and keep the alias locked for the lifetime of the lease.
    pub fn lease(&self) -> FingerprintResult<KeyLease<'_>> {
        let guard = self.lock();
        let status = self.ensure_locked()?;
        Ok(KeyLease {
            _guard: guard,
            manager: self,
            status,
        })
    }

    /// Delete the key if present. Returns whether a key was deleted.
    pub fn reset(&self) -> FingerprintResult<bool> {
        let _guard = self.lock();
        let present = self.store.contains(&self.alias).map_err(|source| {
            FingerprintError::KeyUnavailable {
                alias: self.alias.to_string(),
                source,
            }
        })?;
        if present {
            self.store
                .delete(&self.alias)
                .map_err(|source| FingerprintError::KeyUnavailable {
                    alias: self.alias.to_string(),
                    source,
                })?;
            info!(alias = %self.alias, "signing key deleted");
        }
        Ok(present)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded value is (), a panic while holding it leaves nothing inconsistent
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_locked(&self) -> FingerprintResult<KeyStatus> {
        let present = self.store.contains(&self.alias).map_err(|source| {
            FingerprintError::KeyUnavailable {
                alias: self.alias.to_string(),
                source,
            }
        })?;
        if present {
            debug!(alias = %self.alias, "signing key present");
            return Ok(KeyStatus::Existing);
        }
        self.create_locked().map(KeyStatus::Created)
    }

    fn create_locked(&self) -> FingerprintResult<SigningKeyHandle> {
        for tier in self.tiers.iter() {
            let spec = KeyGenSpec::signing(*tier, self.fresh_challenge());
            match self.store.create(&self.alias, &spec) {
                KeyCreation::Created(handle) => {
                    info!(alias = %self.alias, tier = %handle.tier, "signing key created");
                    return Ok(handle);
                }
                KeyCreation::CapabilityUnavailable => {
                    warn!(alias = %self.alias, tier = %tier, "key tier unavailable, falling back");
                }
                KeyCreation::Failed(source) => {
                    return Err(FingerprintError::KeyUnavailable {
                        alias: self.alias.to_string(),
                        source,
                    });
                }
            }
        }

        Err(FingerprintError::NoTierAvailable {
            alias: self.alias.to_string(),
            tried: self.tiers.to_vec(),
        })
    }

    /// Challenge bound to the creation time of the key.
    fn fresh_challenge(&self) -> Vec<u8> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        format!("{}{}", self.challenge_prefix, millis).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeyStoreError;
    use std::sync::Mutex as StdMutex;

    /// Records every creation attempt and answers from a script.
    struct ScriptedStore {
        answers: StdMutex<Vec<KeyCreation>>,
        attempts: StdMutex<Vec<KeyGenSpec>>,
        present: StdMutex<bool>,
    }

    impl ScriptedStore {
        fn new(answers: Vec<KeyCreation>) -> Self {
            Self {
                answers: StdMutex::new(answers),
                attempts: StdMutex::new(Vec::new()),
                present: StdMutex::new(false),
            }
        }
    }

    impl SecureKeyStore for ScriptedStore {
        fn contains(&self, _alias: &str) -> Result<bool, KeyStoreError> {
            Ok(*self.present.lock().unwrap())
        }

        fn create(&self, _alias: &str, spec: &KeyGenSpec) -> KeyCreation {
            self.attempts.lock().unwrap().push(spec.clone());
            let answer = self.answers.lock().unwrap().remove(0);
            if matches!(answer, KeyCreation::Created(_)) {
                *self.present.lock().unwrap() = true;
            }
            answer
        }

        fn delete(&self, _alias: &str) -> Result<(), KeyStoreError> {
            *self.present.lock().unwrap() = false;
            Ok(())
        }

        fn certificate_chain(&self, alias: &str) -> Result<Vec<Vec<u8>>, KeyStoreError> {
            Err(KeyStoreError::NotFound {
                alias: alias.to_string(),
            })
        }

        fn sign(&self, alias: &str, _data: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
            Err(KeyStoreError::NotFound {
                alias: alias.to_string(),
            })
        }

        fn attestation_supported(&self) -> bool {
            true
        }
    }

    fn handle(tier: KeyTier) -> SigningKeyHandle {
        SigningKeyHandle {
            alias: "auroprint_signing_key".to_string(),
            tier,
            attestation_challenge: Vec::new(),
        }
    }

    fn manager(store: Arc<ScriptedStore>) -> KeyManager {
        KeyManager::new(store, &KeyConfig::default())
    }

    #[test]
    fn falls_back_to_tee_only_on_capability_unavailable() {
        let store = Arc::new(ScriptedStore::new(vec![
            KeyCreation::CapabilityUnavailable,
            KeyCreation::Created(handle(KeyTier::TrustedEnvironment)),
        ]));
        let status = manager(store.clone()).ensure().unwrap();

        assert_eq!(status, KeyStatus::Created(handle(KeyTier::TrustedEnvironment)));
        let attempts = store.attempts.lock().unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].tier, KeyTier::SecureElement);
        assert_eq!(attempts[1].tier, KeyTier::TrustedEnvironment);
        assert_eq!(attempts[0].key_size, 2048);
        assert!(!attempts[1].user_authentication_required);
        assert!(attempts[1]
            .attestation_challenge
            .starts_with(b"auroprint_attestation_"));
    }

    #[test]
    fn generic_failure_propagates_without_fallback() {
        let store = Arc::new(ScriptedStore::new(vec![KeyCreation::Failed(
            KeyStoreError::Backend("keymint crashed".to_string()),
        )]));
        let err = manager(store.clone()).ensure().unwrap_err();

        assert!(matches!(
            err,
            FingerprintError::KeyUnavailable {
                source: KeyStoreError::Backend(_),
                ..
            }
        ));
        assert_eq!(store.attempts.lock().unwrap().len(), 1);
    }

    #[test]
    fn all_tiers_unavailable_is_an_error() {
        let store = Arc::new(ScriptedStore::new(vec![
            KeyCreation::CapabilityUnavailable,
            KeyCreation::CapabilityUnavailable,
        ]));
        let err = manager(store).ensure().unwrap_err();
        match err {
            FingerprintError::NoTierAvailable { tried, .. } => assert_eq!(
                tried,
                vec![KeyTier::SecureElement, KeyTier::TrustedEnvironment]
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ensure_is_idempotent_and_reset_reports_deletion() {
        let store = Arc::new(ScriptedStore::new(vec![KeyCreation::Created(handle(
            KeyTier::SecureElement,
        ))]));
        let manager = manager(store.clone());

        assert!(matches!(manager.ensure().unwrap(), KeyStatus::Created(_)));
        assert_eq!(manager.ensure().unwrap(), KeyStatus::Existing);
        assert_eq!(store.attempts.lock().unwrap().len(), 1);

        assert!(manager.reset().unwrap());
        assert!(!manager.reset().unwrap());
    }

    #[test]
    fn lease_holds_the_alias_lock() {
        let store = Arc::new(ScriptedStore::new(vec![KeyCreation::Created(handle(
            KeyTier::SecureElement,
        ))]));
        let manager = manager(store);
        let lease = manager.lease().unwrap();

        assert!(manager.lock.try_lock().is_err());
        assert_eq!(lease.alias(), "auroprint_signing_key");
        drop(lease);
        assert!(manager.lock.try_lock().is_ok());
    }
}
