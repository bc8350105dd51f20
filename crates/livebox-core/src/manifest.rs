//! Install and run commands derived from the project's `package.json`.

use crate::error::{CoreError, Result};
use crate::process::CommandSpec;
use crate::tree::VirtualFileTree;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Manifest file looked up at the tree root.
pub const MANIFEST_PATH: &str = "package.json";

/// Package manager used when the manifest does not name one.
const DEFAULT_PACKAGE_MANAGER: &str = "npm";

/// Script names tried, in order, for the dev server.
const RUN_SCRIPTS: [&str; 2] = ["dev", "start"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    package_manager: Option<String>,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
}

/// Commands the lifecycle runs for a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectManifest {
    pub name: Option<String>,
    pub install: CommandSpec,
    pub run: CommandSpec,
}

impl ProjectManifest {
    /// Read `package.json` from the root of `tree`.
    pub fn from_tree(tree: &VirtualFileTree) -> Result<Self> {
        let contents = tree
            .file(MANIFEST_PATH)
            .ok_or_else(|| CoreError::Manifest(format!("{MANIFEST_PATH} not found")))?;
        Self::parse(&contents.to_text())
    }

    /// Parse manifest JSON.
    pub fn parse(json: &str) -> Result<Self> {
        let pkg: PackageJson = serde_json::from_str(json)?;

        let pm = pkg
            .package_manager
            .as_deref()
            .and_then(|pm| pm.split('@').next())
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_PACKAGE_MANAGER)
            .to_string();

        let script = RUN_SCRIPTS
            .iter()
            .find(|s| pkg.scripts.contains_key(**s))
            .copied()
            .ok_or_else(|| {
                CoreError::Manifest(format!(
                    "no runnable script, expected one of: {}",
                    RUN_SCRIPTS.join(", ")
                ))
            })?;

        Ok(Self {
            name: pkg.name,
            install: CommandSpec::new(pm.clone(), ["install"]),
            run: CommandSpec::new(pm, ["run", script]),
        })
    }
}
