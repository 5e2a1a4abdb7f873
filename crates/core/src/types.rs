//! Core types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key protection tier, strongest first.
///
/// The serialized names match the security levels reported in Android key
/// attestation records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum KeyTier {
    /// Isolated secure element (StrongBox)
    #[serde(rename = "strongbox")]
    SecureElement,
    /// Trusted execution environment
    TrustedEnvironment,
    /// Software-only key, no hardware isolation
    Software,
}

impl KeyTier {
    /// Stable lowercase name, as used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyTier::SecureElement => "strongbox",
            KeyTier::TrustedEnvironment => "trusted_environment",
            KeyTier::Software => "software",
        }
    }

    /// Whether keys of this tier live in dedicated secure hardware.
    pub fn is_hardware(&self) -> bool {
        !matches!(self, KeyTier::Software)
    }

    /// Security level value used in the key attestation extension.
    pub fn security_level(&self) -> u8 {
        match self {
            KeyTier::Software => 0,
            KeyTier::TrustedEnvironment => 1,
            KeyTier::SecureElement => 2,
        }
    }

    /// Inverse of [`KeyTier::security_level`].
    pub fn from_security_level(level: i64) -> Option<Self> {
        match level {
            0 => Some(KeyTier::Software),
            1 => Some(KeyTier::TrustedEnvironment),
            2 => Some(KeyTier::SecureElement),
            _ => None,
        }
    }
}

impl fmt::Display for KeyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_level_round_trips() {
        for tier in [KeyTier::SecureElement, KeyTier::TrustedEnvironment, KeyTier::Software] {
            assert_eq!(KeyTier::from_security_level(tier.security_level().into()), Some(tier));
        }
        assert_eq!(KeyTier::from_security_level(7), None);
    }

    #[test]
    fn strongest_tier_sorts_first() {
        let mut tiers = vec![
            KeyTier::Software,
            KeyTier::SecureElement,
            KeyTier::TrustedEnvironment,
        ];
        tiers.sort();
        assert_eq!(tiers[0], KeyTier::SecureElement);
        assert!(!KeyTier::Software.is_hardware());
    }
}
