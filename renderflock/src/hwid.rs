//! Stable hardware identity for the node.
//!
//! The controller tells nodes apart by a hash over whatever stable hardware
//! marker the machine can produce, tried in order of stability: the serial
//! of the disk behind the OS root, then the machine's MAC addresses, then a
//! composite of paths and CPU name as a last resort. The winning source
//! string is hashed with SHA-256 and rendered as lowercase hex.
//!
//! The identity is computed once per session and cached; callers that can
//! live without one substitute [`UNKNOWN_IDENTITY`] instead of aborting.

use std::path::Path;
use std::sync::OnceLock;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error};

use crate::hardware;

/// Sentinel identity for nodes where every source failed.
pub const UNKNOWN_IDENTITY: &str = "unknown";

#[derive(Debug, Clone, Error)]
pub enum HwIdError {
    #[error("no hardware source available to derive an identity from")]
    NoSource,
}

/// Source of raw hardware markers, split out so tests can simulate machines.
pub trait HwInfoSource {
    /// Serial number of the storage device mounted at the OS root.
    fn root_disk_serial(&self) -> Option<String>;

    /// Sorted, space-joined MAC addresses of all network interfaces.
    fn mac_addresses(&self) -> Option<String>;

    /// CPU model name.
    fn cpu_name(&self) -> Option<String>;
}

/// Real markers of the machine this node runs on.
///
/// # Platform Support
///
/// Disk serial and MACs are read from procfs/sysfs and therefore Linux-only;
/// other platforms fall through the chain to the CPU-name composite.
pub struct PlatformHwInfo;

impl HwInfoSource for PlatformHwInfo {
    fn root_disk_serial(&self) -> Option<String> {
        root_disk_serial()
    }

    fn mac_addresses(&self) -> Option<String> {
        mac_addresses()
    }

    fn cpu_name(&self) -> Option<String> {
        hardware::detect_cpu_name()
    }
}

/// Derives the node identity from a [`HwInfoSource`].
pub struct HwIdentifier<S: HwInfoSource> {
    source: S,
}

impl HwIdentifier<PlatformHwInfo> {
    pub fn new() -> Self {
        Self::with_source(PlatformHwInfo)
    }
}

impl Default for HwIdentifier<PlatformHwInfo> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: HwInfoSource> HwIdentifier<S> {
    pub fn with_source(source: S) -> Self {
        Self { source }
    }

    /// Compute the identity hash, first fallback that yields a source wins.
    ///
    /// Fails only when even the composite fallback has no CPU name to work
    /// with; that is the caller's cue to use [`UNKNOWN_IDENTITY`].
    pub fn hardware_hash(&self) -> Result<String, HwIdError> {
        if let Some(serial) = self.source.root_disk_serial().filter(|s| !s.is_empty()) {
            debug!("hardware identity derived from root disk serial");
            return Ok(hex_digest(&serial));
        }

        if let Some(macs) = self.source.mac_addresses().filter(|m| !m.is_empty()) {
            debug!("hardware identity derived from MAC addresses");
            return Ok(hex_digest(&macs));
        }

        let cpu_name = self
            .source
            .cpu_name()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                error!("failed to retrieve the CPU name, cannot derive a hardware identity");
                HwIdError::NoSource
            })?;

        debug!("hardware identity derived from path/CPU composite");
        let home = crate::os::home_dir();
        let install_dir = install_dir();
        let composite = format!("{}{}{}", home.display(), install_dir.display(), cpu_name);
        Ok(hex_digest(&composite))
    }
}

/// Identity of this machine, computed once and cached for the session.
///
/// Falls back to [`UNKNOWN_IDENTITY`] when no source is usable.
pub fn session_hardware_id() -> &'static str {
    static IDENTITY: OnceLock<String> = OnceLock::new();
    IDENTITY.get_or_init(|| {
        HwIdentifier::new()
            .hardware_hash()
            .unwrap_or_else(|_| UNKNOWN_IDENTITY.to_string())
    })
}

fn hex_digest(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Directory the node binary was installed to, for the composite fallback.
fn install_dir() -> std::path::PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::path::PathBuf::from("."))
}

/// Serial of the disk holding the root filesystem.
///
/// Resolves the block device behind "/" via `/proc/mounts`, strips the
/// partition suffix, and reads the serial sysfs attribute.
#[cfg(target_os = "linux")]
fn root_disk_serial() -> Option<String> {
    let mounts = std::fs::read_to_string("/proc/mounts").ok()?;
    let device = mounts.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let device = fields.next()?;
        let mountpoint = fields.next()?;
        (mountpoint == "/").then(|| device.to_string())
    })?;

    let name = device.strip_prefix("/dev/")?;
    let base = base_block_device(name);
    let serial = std::fs::read_to_string(format!("/sys/block/{}/device/serial", base)).ok()?;
    let serial = serial.trim().to_string();
    (!serial.is_empty()).then_some(serial)
}

#[cfg(not(target_os = "linux"))]
fn root_disk_serial() -> Option<String> {
    None
}

/// Strip the partition suffix from a block device name:
/// "sda2" -> "sda", "nvme0n1p2" -> "nvme0n1".
#[cfg(target_os = "linux")]
fn base_block_device(name: &str) -> String {
    // nvme0n1p2 / mmcblk0p1 carry a "p<N>" partition suffix; their trailing
    // digits are otherwise part of the device name itself.
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        if let Some(idx) = name.rfind('p') {
            let partition = &name[idx + 1..];
            if !partition.is_empty() && partition.chars().all(|c| c.is_ascii_digit()) {
                return name[..idx].to_string();
            }
        }
        return name.to_string();
    }
    name.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

/// Sorted, space-joined MACs of all physical interfaces.
#[cfg(target_os = "linux")]
fn mac_addresses() -> Option<String> {
    let entries = std::fs::read_dir("/sys/class/net").ok()?;
    let mut macs: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.file_name() != "lo")
        .filter_map(|entry| {
            let mac = std::fs::read_to_string(entry.path().join("address")).ok()?;
            let mac = mac.trim().to_string();
            (!mac.is_empty() && mac != "00:00:00:00:00:00").then_some(mac)
        })
        .collect();
    macs.sort();
    (!macs.is_empty()).then(|| macs.join(" "))
}

#[cfg(not(target_os = "linux"))]
fn mac_addresses() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeMachine {
        serial: Option<&'static str>,
        macs: Option<&'static str>,
        cpu: Option<&'static str>,
    }

    impl HwInfoSource for FakeMachine {
        fn root_disk_serial(&self) -> Option<String> {
            self.serial.map(str::to_string)
        }
        fn mac_addresses(&self) -> Option<String> {
            self.macs.map(str::to_string)
        }
        fn cpu_name(&self) -> Option<String> {
            self.cpu.map(str::to_string)
        }
    }

    #[test]
    fn disk_serial_wins_over_everything() {
        let id = HwIdentifier::with_source(FakeMachine {
            serial: Some("ABC123"),
            macs: Some("00:11:22:33:44:55"),
            cpu: Some("Some CPU"),
        });
        // sha256("ABC123")
        assert_eq!(
            id.hardware_hash().unwrap(),
            "e0bebd22819993425814866b62701e2919ea26f1370499c1037b53b9d49c2c8a"
        );
    }

    #[test]
    fn macs_are_second_in_the_chain() {
        let id = HwIdentifier::with_source(FakeMachine {
            serial: None,
            macs: Some("00:11:22:33:44:55 66:77:88:99:AA:BB"),
            cpu: Some("Some CPU"),
        });
        // sha256("00:11:22:33:44:55 66:77:88:99:AA:BB")
        assert_eq!(
            id.hardware_hash().unwrap(),
            "3f7bcbd3c3e1f24bbf3fab106dc27a0a72bfc0e5714e7aded13c1b841d77dc9f"
        );
    }

    #[test]
    fn empty_sources_fall_through_like_missing_ones() {
        let id = HwIdentifier::with_source(FakeMachine {
            serial: Some(""),
            macs: Some("00:11:22:33:44:55"),
            cpu: None,
        });
        // Empty serial falls through to the MACs.
        assert_eq!(
            id.hardware_hash().unwrap(),
            hex_digest("00:11:22:33:44:55")
        );
    }

    #[test]
    fn composite_fallback_is_deterministic() {
        let machine = || FakeMachine {
            serial: None,
            macs: None,
            cpu: Some("Example CPU @ 3.00GHz"),
        };
        let first = HwIdentifier::with_source(machine()).hardware_hash().unwrap();
        let second = HwIdentifier::with_source(machine()).hardware_hash().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn missing_cpu_name_is_a_hard_failure() {
        let id = HwIdentifier::with_source(FakeMachine {
            serial: None,
            macs: None,
            cpu: None,
        });
        assert!(matches!(id.hardware_hash(), Err(HwIdError::NoSource)));
    }

    #[test]
    fn session_identity_is_stable() {
        let first = session_hardware_id();
        let second = session_hardware_id();
        assert_eq!(first, second);
        assert!(first == UNKNOWN_IDENTITY || first.len() == 64);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn partition_suffix_stripping() {
        assert_eq!(base_block_device("sda2"), "sda");
        assert_eq!(base_block_device("sda"), "sda");
        assert_eq!(base_block_device("nvme0n1p2"), "nvme0n1");
        assert_eq!(base_block_device("nvme0n1"), "nvme0n1");
        assert_eq!(base_block_device("mmcblk0p1"), "mmcblk0");
    }
}
