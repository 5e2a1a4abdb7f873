//! Device identifier derivation from best-effort device signals.
//!
//! The identifier is the lowercase hex SHA-256 of the signal components
//! joined with `|`, in this order:
//!
//! 1. DRM device-binding id (base64), omitted when unavailable or empty
//! 2. static hardware descriptors (board, bootloader, brand, device,
//!    hardware, manufacturer, model, product, then SoC manufacturer and
//!    model when the platform exposes them)
//! 3. display geometry `WxH` and density, omitted when unavailable
//!
//! Display metrics are part of the identifier, so a resolution or density
//! change yields a new `device_id`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

const COMPONENT_SEPARATOR: &str = "|";

/// A device signal source failed. Never fatal to identifier derivation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("device signal unavailable: {0}")]
pub struct SignalError(pub String);

/// Optional signal that may be omitted from the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    DrmId,
    Display,
}

/// Static hardware descriptor strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareDescriptors {
    pub board: String,
    pub bootloader: String,
    pub brand: String,
    pub device: String,
    pub hardware: String,
    pub manufacturer: String,
    pub model: String,
    pub product: String,
    pub soc_manufacturer: Option<String>,
    pub soc_model: Option<String>,
}

impl HardwareDescriptors {
    /// Descriptor values in identifier order.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        [
            &self.board,
            &self.bootloader,
            &self.brand,
            &self.device,
            &self.hardware,
            &self.manufacturer,
            &self.model,
            &self.product,
        ]
        .into_iter()
        .map(String::as_str)
        .chain(
            [&self.soc_manufacturer, &self.soc_model]
                .into_iter()
                .flatten()
                .map(String::as_str),
        )
    }
}

/// Display geometry in pixels and density in dpi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetrics {
    pub width_pixels: u32,
    pub height_pixels: u32,
    pub density_dpi: u32,
}

/// Source of device signals. Each signal may fail independently.
pub trait DeviceSignalSource: Send + Sync {
    /// Raw device-unique id from the DRM / device-binding subsystem.
    fn drm_device_id(&self) -> Result<Vec<u8>, SignalError>;

    /// Static hardware descriptors.
    fn hardware_descriptors(&self) -> HardwareDescriptors;

    /// Current display metrics.
    fn display_metrics(&self) -> Result<DisplayMetrics, SignalError>;
}

/// Derived identifier and the optional signals that did not contribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedDeviceId {
    pub device_id: String,
    pub omitted: Vec<SignalKind>,
}

/// Derive the device identifier from `source`.
pub fn derive_device_id(source: &dyn DeviceSignalSource) -> DerivedDeviceId {
    let mut components: Vec<String> = Vec::new();
    let mut omitted = Vec::new();

    match source.drm_device_id().map(Zeroizing::new) {
        Ok(raw) if !raw.is_empty() => components.push(STANDARD.encode(raw.as_slice())),
        Ok(_) => {
            debug!("DRM device id empty, omitted");
            omitted.push(SignalKind::DrmId);
        }
        Err(e) => {
            warn!(error = %e, "DRM device id omitted");
            omitted.push(SignalKind::DrmId);
        }
    }

    let descriptors = source.hardware_descriptors();
    components.extend(descriptors.components().map(str::to_owned));

    match source.display_metrics() {
        Ok(metrics) => {
            components.push(format!(
                "{}x{}",
                metrics.width_pixels, metrics.height_pixels
            ));
            components.push(metrics.density_dpi.to_string());
        }
        Err(e) => {
            warn!(error = %e, "display metrics omitted");
            omitted.push(SignalKind::Display);
        }
    }

    let combined = Zeroizing::new(components.join(COMPONENT_SEPARATOR));
    DerivedDeviceId {
        device_id: hex::encode(Sha256::digest(combined.as_bytes())),
        omitted,
    }
}

/// Signal source with fixed values, for tests and hosts that supply their
/// own descriptors.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceSignals {
    pub drm_device_id: Option<Vec<u8>>,
    pub descriptors: HardwareDescriptors,
    pub display: Option<DisplayMetrics>,
}

impl DeviceSignalSource for StaticDeviceSignals {
    fn drm_device_id(&self) -> Result<Vec<u8>, SignalError> {
        self.drm_device_id
            .clone()
            .ok_or_else(|| SignalError("no DRM device id configured".to_string()))
    }

    fn hardware_descriptors(&self) -> HardwareDescriptors {
        self.descriptors.clone()
    }

    fn display_metrics(&self) -> Result<DisplayMetrics, SignalError> {
        self.display
            .ok_or_else(|| SignalError("no display configured".to_string()))
    }
}
