//! # livebox-host
//!
//! A [`SandboxProvider`](livebox_core::SandboxProvider) that runs each
//! session in a scratch directory on the local machine.
//!
//! Every boot creates `<root>/<session-uuid>`, the project tree is written
//! there, and commands run as child processes with that directory as their
//! working directory. The first line of a process's output that names a
//! loopback URL (`http://localhost:5173/` and friends) is announced as the
//! sandbox readiness event.
//!
//! This backend isolates nothing beyond the working directory. It exists so
//! the orchestrator can drive real toolchains during development.

mod config;
mod detect;
mod exec;
mod fs;
mod sandbox;

pub use config::HostConfig;
pub use detect::{detect_address, strip_ansi};
pub use sandbox::{HostProvider, HostSandbox};
