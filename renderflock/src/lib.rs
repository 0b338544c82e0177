//! RenderFlock - worker-node runtime for a distributed rendering pool
//!
//! This library turns one physical machine into a supervised compute unit for
//! a rendering pool: it launches the external rendering engine through a
//! platform-specific execution strategy, supervises the resulting process,
//! ranks network mirrors for data transfer, derives a stable hardware
//! identity for the node, and maps every failure onto the error taxonomy
//! shared with the pool controller.
//!
//! # High-Level Flow
//!
//! ```ignore
//! use renderflock::os;
//! use renderflock::process::RenderProcess;
//!
//! let strategy = os::detect().expect("unsupported platform");
//! let spawned = strategy.launch(&command, Some(&env))?;
//!
//! let mut render = RenderProcess::new();
//! render.attach(spawned.child);
//! render.start();
//!
//! // The job pipeline polls at its own cadence:
//! render.update();
//! let code = render.exit_value();
//! ```
//!
//! The job pipeline, configuration loader, and transfer orchestration are
//! external collaborators; this crate only exposes the interfaces they drive.

pub mod config;
pub mod error;
pub mod hardware;
pub mod hwid;
pub mod logging;
pub mod os;
pub mod process;
pub mod speedtest;

/// Version of the RenderFlock library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
