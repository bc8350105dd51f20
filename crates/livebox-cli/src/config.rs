//! Configuration for the `livebox` binary.
//!
//! Configuration is loaded from environment variables with defaults.

use livebox_core::MANIFEST_PATH;
use std::path::PathBuf;
use std::time::Duration;

/// Editable file of the usual Vite/React template.
const DEFAULT_EDITABLE: &str = "src/App.jsx";

const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(250);

/// Configuration for one `livebox` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveboxConfig {
    /// Project directory to load.
    pub project: PathBuf,

    /// Parent directory for sandbox working directories.
    pub workdir: PathBuf,

    /// Project-relative path of the file mirrored into the sandbox.
    pub editable: String,

    /// Give up if the dev server is not reachable in time.
    pub ready_timeout: Option<Duration>,

    /// Give up if installation takes longer.
    pub install_timeout: Option<Duration>,

    /// How often the editable file is checked for changes.
    pub sync_interval: Duration,

    /// Leave the sandbox working directory behind on exit.
    pub keep_workdir: bool,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("project directory not found: {0}")]
    MissingProject(PathBuf),

    #[error("no package.json in project directory: {0}")]
    MissingManifest(PathBuf),

    #[error("editable file not found: {0}")]
    MissingEditable(PathBuf),

    #[error("sync interval must be greater than zero")]
    ZeroSyncInterval,
}

impl Default for LiveboxConfig {
    fn default() -> Self {
        Self {
            project: PathBuf::from("."),
            workdir: std::env::temp_dir().join("livebox"),
            editable: DEFAULT_EDITABLE.to_string(),
            ready_timeout: None,
            install_timeout: None,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            keep_workdir: false,
        }
    }
}

impl LiveboxConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LIVEBOX_PROJECT` | `.` |
    /// | `LIVEBOX_WORKDIR` | `$TMPDIR/livebox` |
    /// | `LIVEBOX_EDITABLE` | `src/App.jsx` |
    /// | `LIVEBOX_READY_TIMEOUT_SECS` | unset (wait forever) |
    /// | `LIVEBOX_INSTALL_TIMEOUT_SECS` | unset (wait forever) |
    /// | `LIVEBOX_SYNC_INTERVAL_MS` | `250` |
    /// | `LIVEBOX_KEEP_WORKDIR` | `false` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        let secs = |key: &str| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|&s| s > 0)
                .map(Duration::from_secs)
        };

        Self {
            project: lookup("LIVEBOX_PROJECT")
                .map(PathBuf::from)
                .unwrap_or(default.project),
            workdir: lookup("LIVEBOX_WORKDIR")
                .map(PathBuf::from)
                .unwrap_or(default.workdir),
            editable: lookup("LIVEBOX_EDITABLE").unwrap_or(default.editable),
            ready_timeout: secs("LIVEBOX_READY_TIMEOUT_SECS"),
            install_timeout: secs("LIVEBOX_INSTALL_TIMEOUT_SECS"),
            sync_interval: lookup("LIVEBOX_SYNC_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.sync_interval),
            keep_workdir: lookup("LIVEBOX_KEEP_WORKDIR")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(default.keep_workdir),
        }
    }

    /// On-disk location of the editable file.
    pub fn editable_on_disk(&self) -> PathBuf {
        self.project.join(self.editable.trim_start_matches('/'))
    }

    /// Check the project layout before anything is booted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.project.is_dir() {
            return Err(ConfigError::MissingProject(self.project.clone()));
        }

        let manifest = self.project.join(MANIFEST_PATH);
        if !manifest.is_file() {
            return Err(ConfigError::MissingManifest(self.project.clone()));
        }

        let editable = self.editable_on_disk();
        if !editable.is_file() {
            return Err(ConfigError::MissingEditable(editable));
        }

        if self.sync_interval.is_zero() {
            return Err(ConfigError::ZeroSyncInterval);
        }

        Ok(())
    }
}
