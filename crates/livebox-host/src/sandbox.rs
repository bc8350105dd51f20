//! Host provider and the per-session sandbox it boots.

use crate::config::HostConfig;
use crate::{exec, fs};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use livebox_core::{
    CommandSpec, CoreError, FileContents, ProcessHandle, ReadySignal, Result, SandboxEnvironment,
    SandboxProvider, ServerAddress, VirtualFileTree,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Boots [`HostSandbox`]es under a common root directory.
#[derive(Debug, Clone, Default)]
pub struct HostProvider {
    config: HostConfig,
}

impl HostProvider {
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }
}

#[async_trait]
impl SandboxProvider for HostProvider {
    async fn boot(&self) -> Result<Arc<dyn SandboxEnvironment>> {
        let sandbox = HostSandbox::create(self.config.clone()).await?;
        Ok(Arc::new(sandbox))
    }
}

/// A working directory on the host plus the processes started in it.
///
/// The directory is removed on drop unless
/// [`HostConfig::keep_workdir`](crate::HostConfig::keep_workdir) is set.
#[derive(Debug)]
pub struct HostSandbox {
    id: Uuid,
    workdir: PathBuf,
    config: HostConfig,
    ready: ReadySignal,
    created_at: DateTime<Utc>,
}

impl HostSandbox {
    pub(crate) async fn create(config: HostConfig) -> Result<Self> {
        let id = Uuid::new_v4();
        let workdir = config.root.join(id.to_string());
        let start = std::time::Instant::now();

        tokio::fs::create_dir_all(&workdir).await.map_err(|e| {
            tracing::error!(sandbox_id = %id, error = %e, "Failed to create working directory");
            CoreError::Boot(format!(
                "failed to create '{}': {}",
                workdir.display(),
                e
            ))
        })?;

        tracing::info!(
            sandbox_id = %id,
            workdir = %workdir.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox booted"
        );

        Ok(Self {
            id,
            workdir,
            config,
            ready: ReadySignal::new(),
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Directory the project is materialized in.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[async_trait]
impl SandboxEnvironment for HostSandbox {
    async fn mount(&self, tree: &VirtualFileTree) -> Result<()> {
        tracing::debug!(sandbox_id = %self.id, files = tree.len(), "Mounting tree");
        fs::materialize(&self.workdir, tree).await
    }

    async fn spawn(&self, command: &CommandSpec) -> Result<ProcessHandle> {
        tracing::info!(sandbox_id = %self.id, command = %command, "Spawning process");
        exec::spawn_process(&self.workdir, &self.config.env, command, self.ready.clone())
    }

    async fn write_file(&self, path: &str, contents: &FileContents) -> Result<()> {
        tracing::debug!(sandbox_id = %self.id, path = %path, bytes = contents.len(), "Writing file");
        fs::write_file(&self.workdir, path, contents).await
    }

    async fn read_file(&self, path: &str) -> Result<FileContents> {
        fs::read_file(&self.workdir, path).await
    }

    fn subscribe_ready(&self) -> broadcast::Receiver<ServerAddress> {
        self.ready.subscribe()
    }
}

impl Drop for HostSandbox {
    fn drop(&mut self) {
        if self.config.keep_workdir {
            tracing::debug!(sandbox_id = %self.id, workdir = %self.workdir.display(), "Keeping working directory");
            return;
        }
        match std::fs::remove_dir_all(&self.workdir) {
            Ok(()) => tracing::debug!(sandbox_id = %self.id, "Working directory removed"),
            Err(e) => tracing::warn!(
                sandbox_id = %self.id,
                workdir = %self.workdir.display(),
                error = %e,
                "Failed to remove working directory"
            ),
        }
    }
}
