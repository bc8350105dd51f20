//! Host backend configuration.

use std::path::PathBuf;

/// Directory name used under the system temp dir when no root is given.
const DEFAULT_ROOT_NAME: &str = "livebox";

/// Configuration for [`HostProvider`](crate::HostProvider).
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Parent directory for per-session working directories.
    pub root: PathBuf,
    /// Extra environment variables for every spawned process.
    pub env: Vec<(String, String)>,
    /// Leave the working directory on disk when the sandbox is dropped.
    pub keep_workdir: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join(DEFAULT_ROOT_NAME),
            // Dev servers like to open a browser on start.
            env: vec![("BROWSER".into(), "none".into())],
            keep_workdir: false,
        }
    }
}

impl HostConfig {
    /// Use `root` as the parent of session directories.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Add an environment variable for spawned processes.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn keep_workdir(mut self, keep: bool) -> Self {
        self.keep_workdir = keep;
        self
    }
}
