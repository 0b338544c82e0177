//! Windows execution strategy.
//!
//! Windows has no `nice`; priority is applied through a process priority
//! class passed as creation flags at spawn time. The niceness scale the
//! controller speaks is mapped onto the six native classes.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Command;

use tracing::warn;

use super::{
    home_dir, priority_from_env, run_shutdown_command, spawn_merged, OsStrategy, SpawnedProcess,
};
use crate::hardware;

/// Windows 8.1 / Server 2012 R2.
const MINIMUM_SUPPORTED_BUILD: u64 = 9600;

/// Native process priority classes, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
    Idle,
    BelowNormal,
    Normal,
    AboveNormal,
    High,
    Realtime,
}

impl PriorityClass {
    /// Process creation flag bits for this class.
    pub fn creation_flags(self) -> u32 {
        match self {
            PriorityClass::Idle => 0x0000_0040,
            PriorityClass::BelowNormal => 0x0000_4000,
            PriorityClass::Normal => 0x0000_0020,
            PriorityClass::AboveNormal => 0x0000_8000,
            PriorityClass::High => 0x0000_0080,
            PriorityClass::Realtime => 0x0000_0100,
        }
    }
}

/// Map a niceness (-19 highest .. 19 lowest) onto a priority class.
///
/// Values outside the niceness scale collapse to `Idle`.
pub fn priority_class_for(niceness: i32) -> PriorityClass {
    match niceness {
        15..=19 => PriorityClass::Idle,
        5..=14 => PriorityClass::BelowNormal,
        -3..=4 => PriorityClass::Normal,
        -9..=-4 => PriorityClass::AboveNormal,
        -14..=-10 => PriorityClass::High,
        -19..=-15 => PriorityClass::Realtime,
        _ => PriorityClass::Idle,
    }
}

/// Suppress the OS crash-dialog popup for faults in child processes.
///
/// The renderer may segfault; without this a modal error box would park the
/// node until someone clicks it away. Unsupported environments are left
/// as-is.
fn suppress_crash_dialogs() {
    #[cfg(windows)]
    {
        // SEM_NOGPFAULTERRORBOX
        const NO_GP_FAULT_ERROR_BOX: u32 = 0x0002;

        #[link(name = "kernel32")]
        extern "system" {
            fn SetErrorMode(mode: u32) -> u32;
        }

        unsafe {
            SetErrorMode(NO_GP_FAULT_ERROR_BOX);
        }
    }
}

/// Build number of the running Windows installation, via `cmd /c ver`.
fn windows_build_number() -> Option<u64> {
    let output = Command::new("cmd").args(["/c", "ver"]).output().ok()?;
    parse_build_number(&String::from_utf8_lossy(&output.stdout))
}

/// Extract the build from e.g. "Microsoft Windows [Version 10.0.19045.3086]".
fn parse_build_number(ver: &str) -> Option<u64> {
    let start = ver.find("Version")? + "Version".len();
    let version = ver[start..]
        .trim_start()
        .trim_end_matches(|c: char| !c.is_ascii_digit());
    version.split('.').nth(2)?.parse().ok()
}

pub struct Windows;

impl OsStrategy for Windows {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn render_binary_path(&self) -> &'static str {
        "renderer.exe"
    }

    fn cuda_lib(&self) -> Option<&'static str> {
        Some("nvcuda")
    }

    fn is_supported(&self) -> bool {
        let build = windows_build_number().unwrap_or_else(|| {
            warn!("failed to extract the Windows build number");
            0
        });
        hardware::is_64bit() && build >= MINIMUM_SUPPORTED_BUILD
    }

    fn supports_high_priority(&self) -> bool {
        // Priority classes up to High need no elevation on Windows.
        true
    }

    fn nice_available(&self) -> bool {
        // No helper tool involved; the priority class covers the whole range.
        true
    }

    fn launch(
        &self,
        command: &[String],
        env: Option<&HashMap<String, String>>,
    ) -> io::Result<SpawnedProcess> {
        let class = priority_class_for(priority_from_env(env));
        suppress_crash_dialogs();

        spawn_merged(command, env, |cmd| {
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                cmd.creation_flags(class.creation_flags());
            }
            #[cfg(not(windows))]
            {
                let _ = (cmd, class);
            }
        })
    }

    fn shutdown_computer(&self, delay_minutes: u32) {
        let command: Vec<String> = [
            "shutdown",
            "/s",
            "/f",
            "/t",
            &(delay_minutes * 60).to_string(),
            "/c",
            "RenderFlock has initiated this computer shutdown.",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        run_shutdown_command(self.name(), &command);
    }

    fn default_config_path(&self) -> PathBuf {
        home_dir().join(".renderflock.conf")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn niceness_extremes_map_to_extreme_classes() {
        assert_eq!(priority_class_for(19), PriorityClass::Idle);
        assert_eq!(priority_class_for(0), PriorityClass::Normal);
        assert_eq!(priority_class_for(-19), PriorityClass::Realtime);
    }

    #[test]
    fn niceness_band_boundaries() {
        assert_eq!(priority_class_for(15), PriorityClass::Idle);
        assert_eq!(priority_class_for(14), PriorityClass::BelowNormal);
        assert_eq!(priority_class_for(5), PriorityClass::BelowNormal);
        assert_eq!(priority_class_for(4), PriorityClass::Normal);
        assert_eq!(priority_class_for(-3), PriorityClass::Normal);
        assert_eq!(priority_class_for(-4), PriorityClass::AboveNormal);
        assert_eq!(priority_class_for(-9), PriorityClass::AboveNormal);
        assert_eq!(priority_class_for(-10), PriorityClass::High);
        assert_eq!(priority_class_for(-14), PriorityClass::High);
        assert_eq!(priority_class_for(-15), PriorityClass::Realtime);
    }

    #[test]
    fn niceness_out_of_scale_collapses_to_idle() {
        assert_eq!(priority_class_for(20), PriorityClass::Idle);
        assert_eq!(priority_class_for(-20), PriorityClass::Idle);
        assert_eq!(priority_class_for(i32::MAX), PriorityClass::Idle);
    }

    #[test]
    fn build_number_parsing() {
        assert_eq!(
            parse_build_number("Microsoft Windows [Version 10.0.19045.3086]"),
            Some(19045)
        );
        assert_eq!(
            parse_build_number("Microsoft Windows [Version 6.3.9600]"),
            Some(9600)
        );
        assert_eq!(parse_build_number("garbled"), None);
    }

    #[test]
    fn priority_classes_have_distinct_flags() {
        let all = [
            PriorityClass::Idle,
            PriorityClass::BelowNormal,
            PriorityClass::Normal,
            PriorityClass::AboveNormal,
            PriorityClass::High,
            PriorityClass::Realtime,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.creation_flags(), b.creation_flags());
            }
        }
    }
}
