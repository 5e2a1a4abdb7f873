//! Structured logging infrastructure for Auroprint.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system with human-readable output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use auroprint_core::logging;
///
/// logging::init();
/// tracing::info!("Application started");
/// ```
pub fn init() {
    init_with(&LoggingConfig::default());
}

/// Initialize the logging system with JSON output for production environments.
pub fn init_json() {
    init_with(&LoggingConfig {
        format: LogFormat::Json,
        ..LoggingConfig::default()
    });
}

/// Initialize logging from the `[logging]` configuration section.
///
/// `RUST_LOG` takes precedence over the configured filter. Logs go to
/// stderr. Calling this more than once is a no-op.
pub fn init_with(config: &LoggingConfig) {
    let filter = env_filter(&config.filter);
    let registry = tracing_subscriber::registry().with(filter);

    let _ = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
    };
}

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_filter_is_used_without_rust_log() {
        if std::env::var_os("RUST_LOG").is_none() {
            let filter = env_filter("auroprint_identity=debug");
            assert_eq!(filter.to_string(), "auroprint_identity=debug");
        }
    }

    #[test]
    fn init_twice_does_not_panic() {
        init();
        init_json();
    }
}
