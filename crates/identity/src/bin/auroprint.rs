//! Auroprint CLI
//!
//! Generates signed device fingerprints on a host using the in-process
//! software key store, and verifies bundles produced elsewhere.

use anyhow::{anyhow, bail, Context, Result};
use auroprint_core::{logging, Config, KeyTier, LogFormat};
use auroprint_identity::{
    BundleVerifier, FingerprintBundle, FingerprintService, HostDeviceSignals,
    LocalIntegrityService, SignalKind, SoftwareKeyStore,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Latency of the local integrity service
const LOCAL_SERVICE_LATENCY: Duration = Duration::from_millis(50);

/// JSON output for device-id command
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceIdOutput {
    device_id: String,
    omitted_signals: Vec<SignalKind>,
}

/// JSON output for hardware command
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HardwareOutput {
    hardware_backed_available: bool,
    tiers: Vec<KeyTier>,
}

/// JSON output for verify command
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyOutput {
    valid: bool,
    security_level: Option<KeyTier>,
    message: String,
}

struct Options {
    config: Option<PathBuf>,
    json_logs: bool,
    command: String,
    args: Vec<String>,
}

fn parse_args() -> Result<Options> {
    let mut config = None;
    let mut json_logs = false;
    let mut positional = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                config = Some(PathBuf::from(path));
            }
            "--json-logs" => json_logs = true,
            _ => positional.push(arg),
        }
    }

    if positional.is_empty() {
        bail!("Usage: auroprint <command> [options]");
    }
    let command = positional.remove(0);
    Ok(Options {
        config,
        json_logs,
        command,
        args: positional,
    })
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default_config(),
    };
    // Hosts have no hardware key store
    if !config.keys.tiers.contains(&KeyTier::Software) {
        warn!(
            configured = ?config.keys.tiers,
            "no hardware key store on this host, appending software tier"
        );
        config.keys.tiers.push(KeyTier::Software);
    }
    Ok(config)
}

fn build_service(config: &Config) -> Result<FingerprintService> {
    let store = SoftwareKeyStore::new().context("failed to initialise key store")?;
    let service = FingerprintService::new(
        Arc::new(store),
        Arc::new(HostDeviceSignals::new()),
        Arc::new(LocalIntegrityService::new(LOCAL_SERVICE_LATENCY)),
        config,
    )?;
    Ok(service)
}

fn cmd_generate(service: &FingerprintService) -> Result<()> {
    let bundle = service.generate_fingerprint()?;
    println!("{}", bundle.to_json_pretty()?);
    Ok(())
}

fn cmd_device_id(service: &FingerprintService) -> Result<()> {
    let derived = service.derive_device_id();
    let output = DeviceIdOutput {
        device_id: derived.device_id,
        omitted_signals: derived.omitted,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_hardware(service: &FingerprintService, config: &Config) -> Result<()> {
    let output = HardwareOutput {
        hardware_backed_available: service.is_hardware_backed_available(),
        tiers: config.keys.tiers.clone(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_token(service: &FingerprintService, args: &[String]) -> Result<()> {
    let nonce = args.first().ok_or_else(|| anyhow!("Missing <nonce> argument"))?;
    let project = match args.get(1) {
        Some(raw) => raw
            .parse::<i64>()
            .with_context(|| format!("invalid cloud project number: {raw}"))?,
        None => 0,
    };
    let token = service.request_integrity_token(nonce, project)?;
    println!("{token}");
    Ok(())
}

fn cmd_verify(args: &[String]) -> Result<()> {
    let path = args
        .first()
        .ok_or_else(|| anyhow!("Missing <bundle.json> argument"))?;
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    let bundle: FingerprintBundle =
        serde_json::from_str(&raw).context("file is not a fingerprint bundle")?;

    let outcome = BundleVerifier::new().verify(&bundle);
    let output = VerifyOutput {
        valid: outcome.verified,
        security_level: outcome
            .key_description
            .as_ref()
            .map(|d| d.attestation_security_level),
        message: match &outcome.failure {
            None => "Bundle is valid".to_string(),
            Some(failure) => format!("{failure:?}"),
        },
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !outcome.verified {
        bail!("bundle verification failed");
    }
    Ok(())
}

fn print_usage() {
    println!("Auroprint CLI - Signed device fingerprints");
    println!();
    println!("USAGE:");
    println!("    auroprint [--config <file>] [--json-logs] <command> [args]");
    println!();
    println!("COMMANDS:");
    println!("    generate                 Generate a signed fingerprint bundle");
    println!("    device-id                Print the derived device identifier");
    println!("    hardware                 Report hardware-backed key availability");
    println!("    token <nonce> [project]  Request an integrity token");
    println!("    verify <bundle.json>     Verify a fingerprint bundle");
    println!();
    println!("EXAMPLES:");
    println!("    auroprint generate > bundle.json");
    println!("    auroprint verify bundle.json");
    println!("    auroprint token abc123 555");
}

fn run(options: Options) -> Result<()> {
    if options.command == "verify" {
        return cmd_verify(&options.args);
    }
    if matches!(options.command.as_str(), "help" | "--help" | "-h") {
        print_usage();
        return Ok(());
    }

    let config = load_config(options.config.as_ref())?;
    let service = build_service(&config)?;
    match options.command.as_str() {
        "generate" => cmd_generate(&service),
        "device-id" => cmd_device_id(&service),
        "hardware" => cmd_hardware(&service, &config),
        "token" => cmd_token(&service, &options.args),
        other => bail!("Unknown command: {other}"),
    }
}

fn main() {
    let options = match parse_args() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {e}");
            println!();
            print_usage();
            process::exit(1);
        }
    };

    // Logging comes from the config file when one is given
    let mut logging_config = options
        .config
        .as_ref()
        .and_then(|path| Config::from_file(path).ok())
        .map(|config| config.logging)
        .unwrap_or_default();
    if options.json_logs {
        logging_config.format = LogFormat::Json;
    }
    logging::init_with(&logging_config);

    if let Err(e) = run(options) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
