//! Seams between the orchestrator and a concrete sandbox backend.

use crate::error::Result;
use crate::process::{CommandSpec, ProcessHandle};
use crate::readiness::ServerAddress;
use crate::tree::{FileContents, VirtualFileTree};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Provisions isolated environments. Called once per session.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Boot a fresh environment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Boot`](crate::CoreError::Boot) if the sandbox
    /// cannot be provisioned.
    async fn boot(&self) -> Result<Arc<dyn SandboxEnvironment>>;
}

/// A booted, isolated execution context.
///
/// After [`mount`](Self::mount) the environment's own filesystem is the
/// authoritative copy of the project.
#[async_trait]
pub trait SandboxEnvironment: Send + Sync {
    /// Materialize `tree`, creating intermediate directories as needed.
    async fn mount(&self, tree: &VirtualFileTree) -> Result<()>;

    /// Start a process inside the sandbox.
    ///
    /// Output produced before the caller drains the handle is buffered.
    async fn spawn(&self, command: &CommandSpec) -> Result<ProcessHandle>;

    /// Write one file through the sandbox's writable file interface.
    async fn write_file(&self, path: &str, contents: &FileContents) -> Result<()>;

    /// Read one file back from the sandbox.
    async fn read_file(&self, path: &str) -> Result<FileContents>;

    /// Subscribe to the sandbox-level "server reachable" event.
    ///
    /// Only events emitted after the call are received.
    fn subscribe_ready(&self) -> broadcast::Receiver<ServerAddress>;
}
