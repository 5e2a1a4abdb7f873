//! Configuration management for Auroprint.

use crate::error::{CoreError, Result};
use crate::types::KeyTier;
use serde::{Deserialize, Serialize};
#[cfg(feature = "toml")]
use std::path::Path;
use tracing::debug;

/// Default alias of the managed signing key.
pub const DEFAULT_KEY_ALIAS: &str = "auroprint_signing_key";

/// Default prefix of the attestation challenge bound at key creation.
pub const DEFAULT_CHALLENGE_PREFIX: &str = "auroprint_attestation_";

/// Default integrity token negotiation timeout (30 seconds).
pub const DEFAULT_TOKEN_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub keys: KeyConfig,
    pub integrity: IntegrityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Alias of the signing key in the secure key store
    pub alias: String,
    /// Capability tiers attempted at key creation, in order
    pub tiers: Vec<KeyTier>,
    /// Prefix of the attestation challenge, followed by the creation time in millis
    pub challenge_prefix: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            alias: DEFAULT_KEY_ALIAS.to_string(),
            tiers: vec![KeyTier::SecureElement, KeyTier::TrustedEnvironment],
            challenge_prefix: DEFAULT_CHALLENGE_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Upper bound on a single token negotiation, in milliseconds
    pub timeout_ms: u64,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TOKEN_TIMEOUT_MS,
        }
    }
}

impl IntegrityConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Fallback filter directive when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
        }
    }
}

impl Config {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading configuration");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self::default()
    }

    /// Reject configurations the fingerprint service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.keys.alias.trim().is_empty() {
            return Err(CoreError::Config("keys.alias must not be empty".to_string()));
        }
        if self.keys.tiers.is_empty() {
            return Err(CoreError::Config(
                "keys.tiers must list at least one tier".to_string(),
            ));
        }
        for (i, tier) in self.keys.tiers.iter().enumerate() {
            if self.keys.tiers[..i].contains(tier) {
                return Err(CoreError::Config(format!(
                    "keys.tiers lists '{}' more than once",
                    tier
                )));
            }
        }
        if self.integrity.timeout_ms == 0 {
            return Err(CoreError::Config(
                "integrity.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
