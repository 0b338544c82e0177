//! Hardware detection for CPU and memory.
//!
//! Provides cross-platform detection of the host hardware with fallbacks for
//! unsupported platforms. The OS support gate, the hardware-identity fallback
//! chain, and the CLI diagnostics all read from here.

/// Detected CPU information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuInfo {
    /// Marketing name of the processor, e.g. "AMD Ryzen 9 5950X 16-Core Processor"
    pub name: String,
    /// Number of logical cores
    pub cores: usize,
}

impl CpuInfo {
    /// Detect the host CPU.
    ///
    /// The name may be empty when the platform offers no way to read it;
    /// callers that need a name must handle that case themselves.
    pub fn detect() -> Self {
        Self {
            name: detect_cpu_name().unwrap_or_default(),
            cores: detect_cpu_cores(),
        }
    }
}

/// Detect the number of logical CPU cores.
///
/// Falls back to 4 if detection fails.
pub fn detect_cpu_cores() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

/// Whether the host runs a 64-bit userland.
///
/// The pool only dispatches jobs to 64-bit nodes; this is the architecture
/// half of every platform's support gate.
pub fn is_64bit() -> bool {
    cfg!(target_pointer_width = "64")
}

/// Detect the CPU model name.
///
/// # Platform Support
///
/// - **Linux**: Parses the first `model name` line of `/proc/cpuinfo`
/// - **Other platforms**: Returns `None`
#[cfg(target_os = "linux")]
pub fn detect_cpu_name() -> Option<String> {
    let content = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("model name") {
            let name = rest.trim_start_matches([' ', '\t', ':']).trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
pub fn detect_cpu_name() -> Option<String> {
    None
}

/// Detect total system memory in kilobytes.
///
/// # Platform Support
///
/// - **Linux**: Parses `MemTotal` from `/proc/meminfo`
/// - **Other platforms**: Returns a fallback of 8GB
pub fn total_memory_kb() -> u64 {
    meminfo_field("MemTotal:").unwrap_or(FALLBACK_MEMORY_KB)
}

/// Detect currently available system memory in kilobytes.
///
/// # Platform Support
///
/// - **Linux**: Parses `MemAvailable` from `/proc/meminfo`
/// - **Other platforms**: Returns a fallback of 8GB
pub fn available_memory_kb() -> u64 {
    meminfo_field("MemAvailable:").unwrap_or(FALLBACK_MEMORY_KB)
}

/// Fallback memory value when detection fails: 8GB in kB.
const FALLBACK_MEMORY_KB: u64 = 8 * 1024 * 1024;

#[cfg(target_os = "linux")]
fn meminfo_field(field: &str) -> Option<u64> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in content.lines() {
        if line.starts_with(field) {
            // Format: "MemTotal:       16384000 kB"
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                if let Ok(kb) = parts[1].parse::<u64>() {
                    return Some(kb);
                }
            }
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn meminfo_field(_field: &str) -> Option<u64> {
    None
}

/// Format a kilobyte count as a human-readable string (e.g. "15.6 GB").
pub fn format_memory_kb(kb: u64) -> String {
    const MB: f64 = 1024.0;
    const GB: f64 = 1024.0 * 1024.0;
    let kb = kb as f64;
    if kb >= GB {
        format!("{:.1} GB", kb / GB)
    } else if kb >= MB {
        format!("{:.1} MB", kb / MB)
    } else {
        format!("{:.0} kB", kb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_cpu_cores_returns_positive() {
        assert!(detect_cpu_cores() > 0, "should detect at least 1 CPU core");
    }

    #[test]
    fn total_memory_returns_positive() {
        assert!(total_memory_kb() > 0);
    }

    #[test]
    fn available_memory_not_above_total() {
        // On platforms without detection both sides are the same fallback.
        assert!(available_memory_kb() <= total_memory_kb());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn cpu_name_detected_on_linux() {
        let name = detect_cpu_name();
        assert!(name.is_some());
        assert!(!name.unwrap().is_empty());
    }

    #[test]
    fn format_memory_units() {
        assert_eq!(format_memory_kb(512), "512 kB");
        assert_eq!(format_memory_kb(2048), "2.0 MB");
        assert_eq!(format_memory_kb(16 * 1024 * 1024), "16.0 GB");
    }
}
