//! Supervision of one launched engine process.
//!
//! A [`RenderProcess`] exclusively owns the child handle of one job attempt.
//! The job pipeline drives it: it calls [`RenderProcess::update`] at its own
//! cadence to sample resident memory, reads [`RenderProcess::exit_value`] to
//! watch for termination, and calls [`RenderProcess::finish`] when the
//! attempt is over.
//!
//! The supervised process dies asynchronously to everything in here; every
//! race with the OS reaping it is treated as a recoverable condition, never
//! an error.

use std::process::Child;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

/// Introspection handle over a running process, identified by pid.
///
/// Reads go through procfs; once the process exits the reads start failing
/// and the owning supervisor drops the probe.
#[derive(Debug, Clone, Copy)]
pub struct MemoryProbe {
    pid: u32,
}

impl MemoryProbe {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Current resident set size in kB.
    ///
    /// Returns `Ok(0)` when the platform offers no way to read it, and an
    /// error once the process is gone.
    ///
    /// # Platform Support
    ///
    /// - **Linux**: Parses `VmRSS` from `/proc/<pid>/status`
    /// - **Other platforms**: Returns `Ok(0)`
    #[cfg(target_os = "linux")]
    pub fn resident_kb(&self) -> std::io::Result<u64> {
        let status = std::fs::read_to_string(format!("/proc/{}/status", self.pid))?;
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                // Format: "VmRSS:      123456 kB"
                if let Some(value) = rest.split_whitespace().next() {
                    if let Ok(kb) = value.parse::<u64>() {
                        return Ok(kb);
                    }
                }
            }
        }
        // Kernel threads and just-exited processes have no VmRSS line.
        Ok(0)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn resident_kb(&self) -> std::io::Result<u64> {
        Ok(0)
    }
}

/// State of one supervised render attempt.
///
/// Current and peak memory are single atomic values so concurrent readers
/// never observe a torn reading while the polling loop updates them.
#[derive(Debug)]
pub struct RenderProcess {
    start_time: Option<Instant>,
    end_time: Option<Instant>,
    /// Remaining duration budget for this job, in seconds.
    remaining_duration: u32,
    /// Cores assigned to this attempt.
    cores_used: u32,
    /// Last observed resident memory, in kB.
    memory_used_kb: AtomicU64,
    /// Highest resident memory ever observed, in kB. Monotonic.
    peak_memory_kb: AtomicU64,
    child: Option<Child>,
    /// Swappable probe slot; taken as one snapshot per operation.
    probe: Mutex<Option<MemoryProbe>>,
}

impl RenderProcess {
    /// A supervisor with nothing attached yet.
    pub fn new() -> Self {
        Self {
            start_time: None,
            end_time: None,
            remaining_duration: 0,
            cores_used: 0,
            memory_used_kb: AtomicU64::new(0),
            peak_memory_kb: AtomicU64::new(0),
            child: None,
            probe: Mutex::new(None),
        }
    }

    /// Take exclusive ownership of a launched process.
    pub fn attach(&mut self, child: Child) {
        let pid = child.id();
        self.child = Some(child);
        *self.probe.lock().unwrap() = Some(MemoryProbe::new(pid));
    }

    /// Record the monotonic start timestamp.
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Sample the process's resident memory.
    ///
    /// Safe to call while the process is exiting concurrently elsewhere: a
    /// stale probe is reset to empty and the current reading to zero, and no
    /// error ever propagates to the polling loop. A zero reading is skipped
    /// rather than recorded, so the peak stays meaningful.
    pub fn update(&self) {
        // One snapshot per call; the slot may be swapped out underneath us.
        let snapshot = *self.probe.lock().unwrap();
        let Some(probe) = snapshot else {
            return;
        };

        match probe.resident_kb() {
            Ok(0) => {}
            Ok(kb) => {
                self.memory_used_kb.store(kb, Ordering::Relaxed);
                self.peak_memory_kb.fetch_max(kb, Ordering::Relaxed);
            }
            Err(_) => {
                // Racing the OS reaping the process; recoverable by design.
                debug!(pid = probe.pid(), "process became unavailable mid-update");
                *self.probe.lock().unwrap() = None;
                self.memory_used_kb.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Duration of the attempt in seconds.
    ///
    /// Zero if never started; `now - start` while running; `end - start`
    /// once finished.
    pub fn duration_secs(&self) -> u64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.duration_since(start).as_secs(),
            (Some(start), None) => start.elapsed().as_secs(),
            _ => 0,
        }
    }

    /// Native exit code of the supervised process.
    ///
    /// -1 if no process was ever attached; 0 while it is still running or
    /// while the exit code is transiently unavailable; otherwise the native
    /// code (on Unix, 128 + signal number for signal deaths). The ambiguity
    /// between "running" and "exited with 0" is part of the wire contract.
    pub fn exit_value(&mut self) -> i32 {
        let Some(child) = self.child.as_mut() else {
            return -1;
        };
        match child.try_wait() {
            Ok(Some(status)) => exit_code(&status),
            // Still running, or the handle is transiently unusable.
            Ok(None) | Err(_) => 0,
        }
    }

    /// Stamp the end timestamp and release both handles, ending ownership.
    pub fn finish(&mut self) {
        self.end_time = Some(Instant::now());
        *self.probe.lock().unwrap() = None;
        self.child = None;
    }

    /// Give the owned child handle to the caller (e.g. for a kill),
    /// releasing the probe with it.
    pub fn take_child(&mut self) -> Option<Child> {
        *self.probe.lock().unwrap() = None;
        self.child.take()
    }

    /// Last observed resident memory in kB.
    pub fn memory_kb(&self) -> u64 {
        self.memory_used_kb.load(Ordering::Relaxed)
    }

    /// Peak resident memory in kB. Never decreases.
    pub fn peak_memory_kb(&self) -> u64 {
        self.peak_memory_kb.load(Ordering::Relaxed)
    }

    pub fn remaining_duration(&self) -> u32 {
        self.remaining_duration
    }

    pub fn set_remaining_duration(&mut self, seconds: u32) {
        self.remaining_duration = seconds;
    }

    pub fn cores_used(&self) -> u32 {
        self.cores_used
    }

    pub fn set_cores_used(&mut self, cores: u32) {
        self.cores_used = cores;
    }

    /// Whether a process is currently attached.
    pub fn has_process(&self) -> bool {
        self.child.is_some()
    }
}

impl Default for RenderProcess {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
        return 128 + signal;
    }
    status.code().unwrap_or(0)
}

#[cfg(not(unix))]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::Duration;

    fn spawn(args: &[&str]) -> Child {
        Command::new(args[0])
            .args(&args[1..])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap()
    }

    #[test]
    fn duration_is_zero_when_never_started() {
        assert_eq!(RenderProcess::new().duration_secs(), 0);
    }

    #[test]
    fn duration_freezes_at_finish() {
        let mut render = RenderProcess::new();
        render.start();
        render.finish();
        let frozen = render.duration_secs();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(render.duration_secs(), frozen);
    }

    #[test]
    fn exit_value_without_process_is_minus_one() {
        assert_eq!(RenderProcess::new().exit_value(), -1);
    }

    #[cfg(unix)]
    #[test]
    fn exit_value_is_zero_while_running() {
        let mut render = RenderProcess::new();
        render.attach(spawn(&["sleep", "30"]));
        assert_eq!(render.exit_value(), 0);

        let mut child = render.take_child().unwrap();
        let _ = child.kill();
        let _ = child.wait();
    }

    #[cfg(unix)]
    #[test]
    fn exit_value_reports_native_code() {
        let mut render = RenderProcess::new();
        render.attach(spawn(&["sh", "-c", "exit 7"]));

        // Poll until the exit is visible; try_wait needs the process reaped.
        let mut code = 0;
        for _ in 0..100 {
            code = render.exit_value();
            if code != 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(code, 7);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn update_with_stale_probe_never_errors_and_resets_memory() {
        let render = RenderProcess::new();
        // Simulate the handle having gone stale: a pid that cannot exist.
        *render.probe.lock().unwrap() = Some(MemoryProbe::new(u32::MAX));
        render.memory_used_kb.store(4096, Ordering::Relaxed);

        render.update();
        render.update(); // second call hits the emptied slot and is a no-op

        assert_eq!(render.memory_kb(), 0);
        assert!(render.probe.lock().unwrap().is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn update_samples_resident_memory_of_live_process() {
        let mut render = RenderProcess::new();
        render.attach(spawn(&["sleep", "30"]));
        render.update();

        // A live sleep process has a nonzero RSS.
        assert!(render.memory_kb() > 0);
        assert!(render.peak_memory_kb() >= render.memory_kb());

        let mut child = render.take_child().unwrap();
        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn peak_memory_is_monotonic() {
        let render = RenderProcess::new();
        render.memory_used_kb.store(100, Ordering::Relaxed);
        render.peak_memory_kb.fetch_max(100, Ordering::Relaxed);
        render.peak_memory_kb.fetch_max(40, Ordering::Relaxed);
        assert_eq!(render.peak_memory_kb(), 100);
    }

    #[test]
    fn finish_releases_both_handles() {
        let mut render = RenderProcess::new();
        *render.probe.lock().unwrap() = Some(MemoryProbe::new(1));
        render.finish();
        assert!(!render.has_process());
        assert!(render.probe.lock().unwrap().is_none());
        assert_eq!(render.exit_value(), -1);
    }
}
