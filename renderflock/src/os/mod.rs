//! Platform execution strategies.
//!
//! Everything that differs between operating systems when launching and
//! controlling the external rendering engine lives behind the [`OsStrategy`]
//! trait: low-priority launch wrappers, priority-class mapping, capability
//! probing, kill, and the courtesy delayed shutdown.
//!
//! Exactly one concrete strategy is selected per process lifetime, through
//! [`detect`] (or [`select`] for simulated platforms in tests), and injected
//! into whatever needs it. The strategy itself is immutable.

mod factory;
mod linux;
mod macos;
mod windows;

pub use factory::{detect, select};
pub use linux::Linux;
pub use macos::{MacArm, MacIntel};
pub use windows::{priority_class_for, PriorityClass, Windows};

use std::collections::HashMap;
use std::io::{self, PipeReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};

use crate::hardware;

/// Environment key carrying the requested niceness for a launch.
///
/// The value is a string-encoded signed integer on the niceness scale,
/// -19 (highest priority) to 19 (lowest).
pub const PRIORITY_ENV: &str = "PRIORITY";

/// Niceness assumed when the environment carries no `PRIORITY` key.
pub const DEFAULT_NICENESS: i32 = 19;

/// A launched engine process: the owned child handle plus the single merged
/// stdout+stderr stream.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Owned handle to the running process.
    pub child: Child,
    /// Read end of the pipe both stdout and stderr were redirected into.
    pub output: PipeReader,
}

impl SpawnedProcess {
    /// OS process id of the launched engine.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

/// Platform capability set for launching and controlling engine processes.
///
/// Concrete variants: [`Windows`], [`MacIntel`], [`MacArm`], [`Linux`].
pub trait OsStrategy: Send + Sync {
    /// Short platform name, e.g. "windows", reported to the controller.
    fn name(&self) -> &'static str;

    /// Path of the engine binary inside the downloaded engine archive.
    fn render_binary_path(&self) -> &'static str;

    /// CUDA runtime library name or path, when the platform has one.
    fn cuda_lib(&self) -> Option<&'static str> {
        None
    }

    /// Whether this node can accept work at all.
    ///
    /// Always gates on a 64-bit userland; variants add a platform-specific
    /// minimum OS version or build check on top.
    fn is_supported(&self) -> bool {
        hardware::is_64bit()
    }

    /// Whether the node may raise the engine above default priority.
    ///
    /// On Unix this requires both effective root privileges and a working
    /// `nice` helper; neither alone is sufficient.
    fn supports_high_priority(&self) -> bool;

    /// Whether the low-priority launch helper is usable.
    ///
    /// A helper that starts at all counts as available, whatever it exits
    /// with; the probe process is always terminated afterward.
    fn nice_available(&self) -> bool;

    /// Spawn the engine with stdout and stderr merged into one stream.
    ///
    /// `env` is merged additively into the inherited process environment. A
    /// `PRIORITY` key selects the niceness; without one the launch assumes
    /// [`DEFAULT_NICENESS`]. When the platform's low-priority wrapper is
    /// unavailable the launch degrades to default priority with a warning
    /// instead of failing.
    fn launch(
        &self,
        command: &[String],
        env: Option<&HashMap<String, String>>,
    ) -> io::Result<SpawnedProcess>;

    /// Terminate the process if a handle is present.
    ///
    /// Returns whether termination was attempted.
    fn kill(&self, process: Option<&mut Child>) -> bool {
        match process {
            Some(child) => {
                if let Err(e) = child.kill() {
                    // Already exited, or the handle went stale; nothing to do.
                    debug!(error = %e, "kill on engine process failed");
                }
                let _ = child.wait();
                true
            }
            None => false,
        }
    }

    /// Best-effort OS power-off after `delay_minutes`, leaving in-flight
    /// work time to wind down. Failures are logged, never escalated.
    fn shutdown_computer(&self, delay_minutes: u32);

    /// Where the node's configuration file lives on this platform.
    fn default_config_path(&self) -> PathBuf;
}

/// Spawn `command` with stdout and stderr feeding a single pipe.
///
/// The caller-supplied environment is merged additively over the inherited
/// one. `configure` runs last and may apply platform-specific settings such
/// as Windows creation flags.
pub(crate) fn spawn_merged(
    command: &[String],
    env: Option<&HashMap<String, String>>,
    configure: impl FnOnce(&mut Command),
) -> io::Result<SpawnedProcess> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty launch command"))?;

    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(extra) = env {
        cmd.envs(extra);
    }

    // One pipe, two write ends: the engine's stdout and stderr interleave
    // into a single stream the supervisor can read.
    let (reader, writer) = io::pipe()?;
    cmd.stdin(Stdio::null());
    cmd.stdout(writer.try_clone()?);
    cmd.stderr(writer);

    configure(&mut cmd);

    let child = cmd.spawn()?;
    debug!(program = %program, pid = child.id(), "engine process spawned");
    Ok(SpawnedProcess {
        child,
        output: reader,
    })
}

/// Niceness requested by the launch environment, or the default.
///
/// A malformed value is reported and replaced with [`DEFAULT_NICENESS`]
/// rather than failing the launch.
pub(crate) fn priority_from_env(env: Option<&HashMap<String, String>>) -> i32 {
    match env.and_then(|e| e.get(PRIORITY_ENV)) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(value = %raw, "invalid PRIORITY value, assuming default niceness");
            DEFAULT_NICENESS
        }),
        None => DEFAULT_NICENESS,
    }
}

/// Prefix `command` with the Unix low-priority wrapper.
pub(crate) fn nice_wrapped(nice_binary: &str, niceness: i32, command: &[String]) -> Vec<String> {
    let mut wrapped = Vec::with_capacity(command.len() + 3);
    wrapped.push(nice_binary.to_string());
    wrapped.push("-n".to_string());
    wrapped.push(niceness.to_string());
    wrapped.extend_from_slice(command);
    wrapped
}

/// Probe whether `nice_binary` can be started.
///
/// Starting counts as available regardless of what the probe process would
/// exit with; the probe is killed and reaped so it never leaks.
pub(crate) fn probe_nice(nice_binary: &str) -> bool {
    match Command::new(nice_binary)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(mut probe) => {
            let _ = probe.kill();
            let _ = probe.wait();
            true
        }
        Err(e) => {
            warn!(
                helper = nice_binary,
                error = %e,
                "low-priority helper unavailable, renderer will run at default priority"
            );
            false
        }
    }
}

/// Whether the effective user is root, per `id -u`.
pub(crate) fn effective_user_is_root() -> bool {
    match Command::new("id").arg("-u").output() {
        Ok(output) => String::from_utf8_lossy(&output.stdout).trim() == "0",
        Err(e) => {
            warn!(error = %e, "unable to run id to check effective privileges");
            false
        }
    }
}

/// Run a shutdown command with inherited stdio, logging failures only.
pub(crate) fn run_shutdown_command(platform: &str, command: &[String]) {
    match spawn_inherited(command) {
        Ok(_) => debug!(platform, "shutdown command issued"),
        Err(e) => warn!(platform, error = %e, "unable to execute the shutdown command"),
    }
}

fn spawn_inherited(command: &[String]) -> io::Result<Child> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
    Command::new(program).args(args).spawn()
}

/// XDG-style configuration path shared by the Unix variants.
///
/// Prefers an existing `$XDG_CONFIG_HOME/renderflock/renderflock.conf`, then
/// an existing `~/.renderflock.conf`, and otherwise settles on the XDG
/// location for a fresh install.
pub(crate) fn unix_config_path() -> PathBuf {
    let home = home_dir();
    let xdg_base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| home.join(".config"));

    let xdg_config = xdg_base.join("renderflock").join("renderflock.conf");
    if xdg_config.exists() {
        return xdg_config;
    }

    let legacy = home.join(".renderflock.conf");
    if legacy.exists() {
        return legacy;
    }

    xdg_config
}

pub(crate) fn home_dir() -> PathBuf {
    #[allow(deprecated)] // un-deprecated in recent toolchains
    std::env::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn factory_selects_one_variant_per_platform() {
        assert_eq!(select("windows", "x86_64").unwrap().name(), "windows");
        assert_eq!(select("linux", "x86_64").unwrap().name(), "linux");
        assert_eq!(select("macos", "x86_64").unwrap().name(), "mac");
        assert_eq!(select("macos", "aarch64").unwrap().name(), "mac");
        assert!(select("freebsd", "x86_64").is_none());
    }

    #[test]
    fn factory_distinguishes_mac_architectures() {
        // The ARM variant has no CUDA; the Intel one does.
        assert!(select("macos", "x86_64").unwrap().cuda_lib().is_some());
        assert!(select("macos", "aarch64").unwrap().cuda_lib().is_none());
    }

    #[test]
    fn priority_defaults_without_env() {
        assert_eq!(priority_from_env(None), DEFAULT_NICENESS);
        let empty = HashMap::new();
        assert_eq!(priority_from_env(Some(&empty)), DEFAULT_NICENESS);
    }

    #[test]
    fn priority_parses_signed_values() {
        let mut env = HashMap::new();
        env.insert(PRIORITY_ENV.to_string(), "-7".to_string());
        assert_eq!(priority_from_env(Some(&env)), -7);

        env.insert(PRIORITY_ENV.to_string(), "not-a-number".to_string());
        assert_eq!(priority_from_env(Some(&env)), DEFAULT_NICENESS);
    }

    #[test]
    fn nice_wrapping_prepends_helper_invocation() {
        let wrapped = nice_wrapped("nice", 19, &cmd(&["renderer", "--frame", "12"]));
        assert_eq!(wrapped, cmd(&["nice", "-n", "19", "renderer", "--frame", "12"]));
    }

    #[test]
    fn spawn_rejects_empty_command() {
        assert!(spawn_merged(&[], None, |_| {}).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn spawn_merges_stderr_into_stdout() {
        let mut spawned = spawn_merged(
            &cmd(&["sh", "-c", "echo to-stdout; echo to-stderr 1>&2"]),
            None,
            |_| {},
        )
        .unwrap();

        let mut merged = String::new();
        spawned.output.read_to_string(&mut merged).unwrap();
        let _ = spawned.child.wait();

        assert!(merged.contains("to-stdout"));
        assert!(merged.contains("to-stderr"));
    }

    #[cfg(unix)]
    #[test]
    fn spawn_env_merge_is_additive() {
        let mut env = HashMap::new();
        env.insert("RENDERFLOCK_TEST_MARKER".to_string(), "present".to_string());

        let mut spawned = spawn_merged(
            &cmd(&["sh", "-c", "echo $RENDERFLOCK_TEST_MARKER:$PATH"]),
            Some(&env),
            |_| {},
        )
        .unwrap();

        let mut output = String::new();
        spawned.output.read_to_string(&mut output).unwrap();
        let _ = spawned.child.wait();

        // The extra variable is visible and the inherited environment is kept.
        assert!(output.starts_with("present:"));
        assert!(output.trim_end().len() > "present:".len());
    }

    #[cfg(unix)]
    #[test]
    fn kill_terminates_running_process() {
        let strategy = Linux;
        let mut spawned = spawn_merged(&cmd(&["sleep", "30"]), None, |_| {}).unwrap();
        assert!(strategy.kill(Some(&mut spawned.child)));
        assert!(!strategy.kill(None));
    }

    #[cfg(unix)]
    #[test]
    fn nice_probe_does_not_leak_processes() {
        // "sleep" happily starts and would run forever if not reaped.
        assert!(probe_nice("sleep"));
        assert!(!probe_nice("renderflock-no-such-helper"));
    }
}
