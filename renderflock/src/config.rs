//! Node settings consumed by the runtime.
//!
//! Loading, merging, and persisting configuration is the job of an external
//! collaborator; this module only defines the typed settings the runtime
//! reads, their defaults, and the bridge into the launch environment.

use std::collections::HashMap;

use crate::os::{DEFAULT_NICENESS, PRIORITY_ENV};

/// Runtime settings for this worker node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Niceness for the engine process, -19 (highest) to 19 (lowest).
    pub priority: i32,
    /// Cores to hand to the engine; `None` means all of them.
    pub cores: Option<u32>,
    /// Power the machine off once the session ends.
    pub shutdown_when_done: bool,
    /// Minutes of grace the shutdown leaves for in-flight work.
    pub shutdown_delay_minutes: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            priority: DEFAULT_NICENESS,
            cores: None,
            shutdown_when_done: false,
            shutdown_delay_minutes: 1,
        }
    }
}

impl Settings {
    /// Environment additions for an engine launch under these settings.
    pub fn render_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(PRIORITY_ENV.to_string(), self.priority.to_string());
        env
    }

    /// Clamp the priority onto the niceness scale.
    pub fn normalized(mut self) -> Self {
        self.priority = self.priority.clamp(-19, 19);
        self
    }
}
