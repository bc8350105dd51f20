//! Orchestrator configuration types.

use crate::error::CoreError;
use crate::manifest::ProjectManifest;
use crate::process::CommandSpec;
use crate::tree::normalize_path;
use std::time::Duration;

/// Configuration for one preview session.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Dependency installation command (awaited).
    pub install: CommandSpec,
    /// Dev server command (never awaited).
    pub run: CommandSpec,
    /// The single path whose edits are synced into the sandbox.
    pub editable_path: String,
    /// Bound on sandbox boot.
    pub boot_timeout: Option<Duration>,
    /// Bound on tree materialization.
    pub mount_timeout: Option<Duration>,
    /// Bound on the install process, from spawn to exit.
    pub install_timeout: Option<Duration>,
    /// Bound on the first readiness event after the server is spawned.
    pub ready_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            install: CommandSpec::new("npm", ["install"]),
            run: CommandSpec::new("npm", ["run", "dev"]),
            editable_path: String::new(),
            boot_timeout: None,
            mount_timeout: None,
            install_timeout: None,
            ready_timeout: None,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new config builder.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Builder prefilled with the manifest's install and run commands.
    pub fn from_manifest(manifest: &ProjectManifest) -> OrchestratorConfigBuilder {
        Self::builder()
            .install(manifest.install.clone())
            .run(manifest.run.clone())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.install.program.is_empty() {
            return Err(CoreError::Config("install command is required".into()));
        }
        if self.run.program.is_empty() {
            return Err(CoreError::Config("run command is required".into()));
        }
        if self.editable_path.is_empty() {
            return Err(CoreError::Config("editable_path is required".into()));
        }
        normalize_path(&self.editable_path)?;

        let timeouts = [
            ("boot_timeout", self.boot_timeout),
            ("mount_timeout", self.mount_timeout),
            ("install_timeout", self.install_timeout),
            ("ready_timeout", self.ready_timeout),
        ];
        for (name, timeout) in timeouts {
            if timeout == Some(Duration::ZERO) {
                return Err(CoreError::Config(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

/// Builder for OrchestratorConfig.
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Set the install command.
    pub fn install(mut self, command: CommandSpec) -> Self {
        self.config.install = command;
        self
    }

    /// Set the dev server command.
    pub fn run(mut self, command: CommandSpec) -> Self {
        self.config.run = command;
        self
    }

    /// Set the editable path.
    pub fn editable_path(mut self, path: impl Into<String>) -> Self {
        self.config.editable_path = path.into();
        self
    }

    pub fn boot_timeout(mut self, timeout: Duration) -> Self {
        self.config.boot_timeout = Some(timeout);
        self
    }

    pub fn mount_timeout(mut self, timeout: Duration) -> Self {
        self.config.mount_timeout = Some(timeout);
        self
    }

    pub fn install_timeout(mut self, timeout: Duration) -> Self {
        self.config.install_timeout = Some(timeout);
        self
    }

    /// Turn a silent hang into a `Timeout` failure after `timeout`.
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.config.ready_timeout = Some(timeout);
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<OrchestratorConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
