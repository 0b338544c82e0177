//! Linux execution strategy.
//!
//! Pool nodes are overwhelmingly Linux boxes; the strategy is the plainest of
//! the set. Launches go through the `nice` wrapper, support is a pure
//! architecture gate, and shutdown defers to the system `shutdown` command.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use tracing::warn;

use super::{
    effective_user_is_root, nice_wrapped, priority_from_env, probe_nice, run_shutdown_command,
    spawn_merged, unix_config_path, OsStrategy, SpawnedProcess,
};

const NICE_BINARY: &str = "nice";

pub struct Linux;

impl OsStrategy for Linux {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn render_binary_path(&self) -> &'static str {
        "renderer"
    }

    fn cuda_lib(&self) -> Option<&'static str> {
        Some("libcuda.so")
    }

    fn supports_high_priority(&self) -> bool {
        // Raising priority needs root *and* a working nice helper.
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
        if self.nice_available() {
            let wrapped = nice_wrapped(NICE_BINARY, priority_from_env(env), command);
            spawn_merged(&wrapped, env, |_| {})
        } else {
            warn!("no low-priority helper, launching renderer at default priority");
            spawn_merged(command, env, |_| {})
        }
    }

    fn shutdown_computer(&self, delay_minutes: u32) {
        let command: Vec<String> = ["shutdown", "-h", &format!("+{}", delay_minutes)]
            .iter()
            .map(|s| s.to_string())
            .collect();
        run_shutdown_command(self.name(), &command);
    }

    fn default_config_path(&self) -> PathBuf {
        unix_config_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[cfg(unix)]
    #[test]
    fn launch_runs_wrapped_command_to_completion() {
        let mut spawned = Linux.launch(&cmd(&["echo", "frame-done"]), None).unwrap();

        let mut output = String::new();
        spawned.output.read_to_string(&mut output).unwrap();
        let status = spawned.child.wait().unwrap();

        assert!(status.success());
        assert_eq!(output.trim(), "frame-done");
    }

    #[cfg(unix)]
    #[test]
    fn launch_honors_priority_env() {
        let mut env = HashMap::new();
        env.insert(super::super::PRIORITY_ENV.to_string(), "10".to_string());

        let mut spawned = Linux
            .launch(&cmd(&["sh", "-c", "echo ok"]), Some(&env))
            .unwrap();

        let mut output = String::new();
        spawned.output.read_to_string(&mut output).unwrap();
        let status = spawned.child.wait().unwrap();

        assert!(status.success());
        assert_eq!(output.trim(), "ok");
    }

    #[test]
    fn linux_support_is_an_architecture_gate() {
        assert_eq!(Linux.is_supported(), crate::hardware::is_64bit());
    }
}
