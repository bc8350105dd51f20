//! Support code for the `livebox` binary.
//!
//! - [`config`]: environment-driven settings
//! - [`project`]: loading a project directory into a tree
//! - [`mirror`]: pushing on-disk edits of the editable file into the sandbox

pub mod config;
pub mod mirror;
pub mod project;

pub use config::{ConfigError, LiveboxConfig};
pub use mirror::EditMirror;
pub use project::load_tree;
