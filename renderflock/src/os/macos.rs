//! macOS execution strategies.
//!
//! Two variants: Intel Macs, which need a minimum OS version check and still
//! carry a CUDA path, and Apple Silicon Macs, which are 64-bit ARM only and
//! have neither. Both launch through the `nice` wrapper.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Command;

use tracing::warn;

use super::{
    effective_user_is_root, nice_wrapped, priority_from_env, probe_nice, run_shutdown_command,
    spawn_merged, unix_config_path, OsStrategy, SpawnedProcess,
};
use crate::hardware;

const NICE_BINARY: &str = "nice";

/// macOS product version as (major, minor), via `sw_vers -productVersion`.
fn mac_version() -> Option<(u32, u32)> {
    let output = Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .ok()?;
    parse_product_version(&String::from_utf8_lossy(&output.stdout))
}

fn parse_product_version(raw: &str) -> Option<(u32, u32)> {
    let mut parts = raw.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor))
}

/// Intel support floor: macOS 10.13 (High Sierra) or any 11+ release.
fn intel_version_supported(major: u32, minor: u32) -> bool {
    (major == 10 && minor >= 13) || major >= 11
}

fn mac_launch(
    command: &[String],
    env: Option<&HashMap<String, String>>,
) -> io::Result<SpawnedProcess> {
    if probe_nice(NICE_BINARY) {
        let wrapped = nice_wrapped(NICE_BINARY, priority_from_env(env), command);
        spawn_merged(&wrapped, env, |_| {})
    } else {
        warn!("no low-priority helper, launching renderer at default priority");
        spawn_merged(command, env, |_| {})
    }
}

fn mac_shutdown(name: &'static str, delay_minutes: u32) {
    let command: Vec<String> = ["shutdown", "-h", &format!("+{}", delay_minutes)]
        .iter()
        .map(|s| s.to_string())
        .collect();
    run_shutdown_command(name, &command);
}

/// Intel Macs. Supported from macOS 10.13 (High Sierra) upward.
pub struct MacIntel;

impl OsStrategy for MacIntel {
    fn name(&self) -> &'static str {
        "mac"
    }

    fn render_binary_path(&self) -> &'static str {
        "renderer.app/Contents/MacOS/renderer"
    }

    fn cuda_lib(&self) -> Option<&'static str> {
        Some("/usr/local/cuda/lib/libcuda.dylib")
    }

    fn is_supported(&self) -> bool {
        let version_ok = match mac_version() {
            Some((major, minor)) => intel_version_supported(major, minor),
            None => {
                warn!("failed to read the macOS product version");
                false
            }
        };
        hardware::is_64bit() && version_ok
    }

    fn supports_high_priority(&self) -> bool {
        effective_user_is_root() && self.nice_available()
    }

    fn nice_available(&self) -> bool {
        probe_nice(NICE_BINARY)
    }

    fn launch(
        &self,
        command: &[String],
        env: Option<&HashMap<String, String>>,
    ) -> io::Result<SpawnedProcess> {
        mac_launch(command, env)
    }

    fn shutdown_computer(&self, delay_minutes: u32) {
        mac_shutdown(self.name(), delay_minutes);
    }

    fn default_config_path(&self) -> PathBuf {
        unix_config_path()
    }
}

/// Apple Silicon Macs. Every ARM Mac ships with macOS 11 or later, so the
/// architecture gate is the whole support check.
pub struct MacArm;

impl OsStrategy for MacArm {
    fn name(&self) -> &'static str {
        "mac"
    }

    fn render_binary_path(&self) -> &'static str {
        "renderer.app/Contents/MacOS/renderer"
    }

    fn is_supported(&self) -> bool {
        hardware::is_64bit()
    }

    fn supports_high_priority(&self) -> bool {
        effective_user_is_root() && self.nice_available()
    }

    fn nice_available(&self) -> bool {
        probe_nice(NICE_BINARY)
    }

    fn launch(
        &self,
        command: &[String],
        env: Option<&HashMap<String, String>>,
    ) -> io::Result<SpawnedProcess> {
        mac_launch(command, env)
    }

    fn shutdown_computer(&self, delay_minutes: u32) {
        mac_shutdown(self.name(), delay_minutes);
    }

    fn default_config_path(&self) -> PathBuf {
        unix_config_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_version_parsing() {
        assert_eq!(parse_product_version("10.13.6\n"), Some((10, 13)));
        assert_eq!(parse_product_version("11.7"), Some((11, 7)));
        assert_eq!(parse_product_version("14"), Some((14, 0)));
        assert_eq!(parse_product_version("beta"), None);
    }

    #[test]
    fn version_gate_bands() {
        for ((major, minor), supported) in [
            ((10, 12), false),
            ((10, 13), true),
            ((10, 15), true),
            ((11, 0), true),
            ((14, 2), true),
        ] {
            assert_eq!(
                intel_version_supported(major, minor),
                supported,
                "{}.{}",
                major,
                minor
            );
        }
    }
}
