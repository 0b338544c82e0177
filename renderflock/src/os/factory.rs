//! Strategy selection.
//!
//! Selection happens once, at startup, and the resolved strategy is injected
//! into consumers; nothing in here keeps lazy global state.

use super::{Linux, MacArm, MacIntel, OsStrategy, Windows};

/// Resolve the strategy for an explicit platform description.
///
/// `os` and `arch` follow the `std::env::consts` vocabulary. Returns `None`
/// for platforms the pool does not run on.
pub fn select(os: &str, arch: &str) -> Option<Box<dyn OsStrategy>> {
    match os {
        "windows" => Some(Box::new(Windows)),
        "linux" => Some(Box::new(Linux)),
        "macos" => {
            if arch == "aarch64" {
                Some(Box::new(MacArm))
            } else {
                Some(Box::new(MacIntel))
            }
        }
        _ => None,
    }
}

/// Resolve the strategy for the platform this node actually runs on.
pub fn detect() -> Option<Box<dyn OsStrategy>> {
    select(std::env::consts::OS, std::env::consts::ARCH)
}
