//! Error types for livebox-core.

use crate::process::ProcessId;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by sandbox backends and the types that feed them.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The sandbox could not be provisioned.
    #[error("boot failed: {0}")]
    Boot(String),

    /// Materializing the tree (or a single write) failed.
    #[error("mount failed at '{path}': {message}")]
    Mount {
        /// Path that failed to materialize.
        path: String,
        /// Backend error message.
        message: String,
    },

    /// A process could not be started.
    #[error("failed to spawn '{command}': {message}")]
    Spawn {
        /// Rendered command line.
        command: String,
        /// Backend error message.
        message: String,
    },

    /// A path was empty, escaped the tree, or collided with another entry.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// Offending path as given.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A file did not exist in the sandbox.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The project manifest was missing or unusable.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// The backend dropped a process without reporting an exit status.
    #[error("process {0} ended without an exit status")]
    ProcessLost(ProcessId),

    /// Operation requested in the wrong lifecycle state.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle step a timeout applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Boot,
    Mount,
    Install,
    ServerReady,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "boot"),
            Self::Mount => write!(f, "mount"),
            Self::Install => write!(f, "install"),
            Self::ServerReady => write!(f, "server-ready"),
        }
    }
}

/// Terminal failure of a session, carried as data in the phase observable.
///
/// None of these are retried. The caller renders them as an error view.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleError {
    /// Sandbox could not be provisioned.
    #[error("sandbox boot failed: {message}")]
    Boot { message: String },

    /// Tree materialization failed.
    #[error("mounting project files failed: {message}")]
    Mount { message: String },

    /// The install step exited non-zero.
    #[error("dependency installation exited with code {exit_code}")]
    Installation { exit_code: i32 },

    /// A lifecycle process could not be started.
    #[error("failed to start process: {message}")]
    Spawn { message: String },

    /// A step did not finish within its configured bound.
    #[error("{step} did not complete within {after:?}")]
    Timeout { step: Step, after: Duration },

    /// The dev server exited without being asked to.
    #[error("dev server exited unexpectedly with code {exit_code}")]
    ServerExited { exit_code: i32 },
}

impl LifecycleError {
    pub(crate) fn boot(err: CoreError) -> Self {
        Self::Boot {
            message: err.to_string(),
        }
    }

    pub(crate) fn mount(err: CoreError) -> Self {
        Self::Mount {
            message: err.to_string(),
        }
    }

    pub(crate) fn spawn(err: CoreError) -> Self {
        Self::Spawn {
            message: err.to_string(),
        }
    }
}

/// Per-edit failure of the file sync channel. Never fatal for the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The path is not the designated editable path.
    #[error("'{path}' is not the editable path '{editable}'")]
    NotEditable { path: String, editable: String },

    /// The sandbox rejected the write.
    #[error("write to '{path}' failed: {message}")]
    Write { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_installation_error_message_carries_code() {
        let err = LifecycleError::Installation { exit_code: 127 };
        assert_eq!(
            err.to_string(),
            "dependency installation exited with code 127"
        );
    }

    #[test]
    fn test_step_display() {
        assert_eq!(Step::Boot.to_string(), "boot");
        assert_eq!(Step::ServerReady.to_string(), "server-ready");
    }

    #[test]
    fn test_lifecycle_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(LifecycleError::ServerExited { exit_code: 3 }).unwrap();
        assert_eq!(json["kind"], "server_exited");
        assert_eq!(json["exit_code"], 3);
    }

    #[test]
    fn test_core_error_is_wrapped_with_context() {
        let err = LifecycleError::boot(CoreError::Boot("quota exceeded".into()));
        assert_eq!(
            err,
            LifecycleError::Boot {
                message: "boot failed: quota exceeded".into()
            }
        );
    }
}
