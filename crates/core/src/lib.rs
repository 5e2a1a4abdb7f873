//! Core functionality for the Auroprint device fingerprinting system.
//!
//! This crate provides the shared types, configuration and logging setup
//! used across the Auroprint crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{Config, IntegrityConfig, KeyConfig, LogFormat, LoggingConfig};
pub use error::{CoreError, Result};
pub use types::KeyTier;
