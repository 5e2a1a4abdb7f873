//! Device signals for Linux hosts.
//!
//! The machine id stands in for the DRM device-binding id, DMI and
//! `/proc/cpuinfo` provide the hardware descriptors. Headless hosts have no
//! display metrics, so that signal is always omitted here.

use crate::device::{DeviceSignalSource, DisplayMetrics, HardwareDescriptors, SignalError};
use std::fs;
use std::path::{Path, PathBuf};

const UNKNOWN: &str = "unknown";

/// Reads device signals from the host filesystem.
#[derive(Debug, Clone)]
pub struct HostDeviceSignals {
    root: PathBuf,
}

impl Default for HostDeviceSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDeviceSignals {
    pub fn new() -> Self {
        Self::with_root("/")
    }

    /// Resolve every signal path relative to `root` instead of `/`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn read_trimmed(&self, relative: &str) -> Option<String> {
        fs::read_to_string(self.root.join(relative))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn dmi(&self, field: &str) -> String {
        self.read_trimmed(&format!("sys/class/dmi/id/{field}"))
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    fn cpuinfo_field(&self, key: &str) -> Option<String> {
        let cpuinfo = self.read_trimmed("proc/cpuinfo")?;
        cpuinfo.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            (name.trim() == key)
                .then(|| value.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }
}

impl DeviceSignalSource for HostDeviceSignals {
    fn drm_device_id(&self) -> Result<Vec<u8>, SignalError> {
        let machine_id = self
            .read_trimmed("etc/machine-id")
            .ok_or_else(|| SignalError("machine-id not readable".to_string()))?;
        hex::decode(&machine_id)
            .map_err(|e| SignalError(format!("machine-id is not hex: {e}")))
    }

    fn hardware_descriptors(&self) -> HardwareDescriptors {
        HardwareDescriptors {
            board: self.dmi("board_name"),
            bootloader: self.dmi("bios_version"),
            brand: self.dmi("sys_vendor"),
            device: self.dmi("product_family"),
            hardware: std::env::consts::ARCH.to_string(),
            manufacturer: self.dmi("board_vendor"),
            model: self.dmi("product_name"),
            product: self.dmi("product_version"),
            soc_manufacturer: self.cpuinfo_field("vendor_id"),
            soc_model: self.cpuinfo_field("model name"),
        }
    }

    fn display_metrics(&self) -> Result<DisplayMetrics, SignalError> {
        Err(SignalError("no display on host".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{derive_device_id, SignalKind};

    fn fake_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "auroprint-host-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::create_dir_all(root.join("sys/class/dmi/id")).unwrap();
        fs::create_dir_all(root.join("proc")).unwrap();
        root
    }

    #[test]
    fn reads_descriptors_from_dmi_and_cpuinfo() {
        let root = fake_root("dmi");
        fs::write(root.join("sys/class/dmi/id/board_name"), "X570\n").unwrap();
        fs::write(root.join("sys/class/dmi/id/sys_vendor"), "ACME\n").unwrap();
        fs::write(
            root.join("proc/cpuinfo"),
            "processor\t: 0\nvendor_id\t: AuthenticAMD\nmodel name\t: Ryzen 9\n",
        )
        .unwrap();

        let descriptors = HostDeviceSignals::with_root(&root).hardware_descriptors();
        assert_eq!(descriptors.board, "X570");
        assert_eq!(descriptors.brand, "ACME");
        assert_eq!(descriptors.model, UNKNOWN);
        assert_eq!(descriptors.soc_manufacturer.as_deref(), Some("AuthenticAMD"));
        assert_eq!(descriptors.soc_model.as_deref(), Some("Ryzen 9"));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn machine_id_binds_identifier() {
        let root = fake_root("machine-id");
        let signals = HostDeviceSignals::with_root(&root);

        let without = derive_device_id(&signals);
        assert_eq!(without.omitted, vec![SignalKind::DrmId, SignalKind::Display]);

        fs::write(
            root.join("etc/machine-id"),
            "0123456789abcdef0123456789abcdef\n",
        )
        .unwrap();
        let with = derive_device_id(&signals);
        assert_eq!(with.omitted, vec![SignalKind::Display]);
        assert_ne!(with.device_id, without.device_id);

        let _ = fs::remove_dir_all(&root);
    }
}
