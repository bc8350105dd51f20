//! # livebox-core
//!
//! Sandbox lifecycle orchestration for live previews.
//!
//! Given a project tree, the [`Orchestrator`] boots an isolated sandbox,
//! mounts the tree, installs dependencies, starts a dev server and reports
//! when it becomes reachable. A [`FileSyncChannel`] pushes edits of one
//! designated file into the running sandbox without restarting anything.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      livebox-core                        │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │  Orchestrator   │────▶│  dyn SandboxProvider     │    │
//! │  │   - start()     │     │   - boot()               │    │
//! │  │   - phase()     │     └──────────────────────────┘    │
//! │  │   - address()   │                │                    │
//! │  └─────────────────┘                ▼                    │
//! │      │         │         ┌──────────────────────────┐    │
//! │      │         └────────▶│  dyn SandboxEnvironment  │    │
//! │      ▼                   │   - mount() / spawn()    │    │
//! │  ┌─────────────────┐     │   - write_file()         │    │
//! │  │ ReadinessBridge │◀────│   - subscribe_ready()    │    │
//! │  └─────────────────┘     └──────────────────────────┘    │
//! │                                     ▲                    │
//! │  ┌─────────────────┐                │                    │
//! │  │ FileSyncChannel │────────────────┘                    │
//! │  └─────────────────┘                                     │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use livebox_core::{Orchestrator, OrchestratorConfig, ProjectManifest, VirtualFileTree};
//! use std::sync::Arc;
//!
//! # async fn example(provider: Arc<dyn livebox_core::SandboxProvider>) -> Result<(), Box<dyn std::error::Error>> {
//! let tree = VirtualFileTree::from_files([
//!     ("package.json", r#"{"scripts":{"dev":"vite"}}"#),
//!     ("src/App.jsx", "export default () => <h1>hi</h1>"),
//! ])?;
//! let manifest = ProjectManifest::from_tree(&tree)?;
//! let config = OrchestratorConfig::from_manifest(&manifest)
//!     .editable_path("/src/App.jsx")
//!     .build()?;
//!
//! let sink = Arc::new(|chunk: &livebox_core::OutputChunk| print!("{}", chunk.to_text()));
//! let orchestrator = Orchestrator::new(provider, tree, config, sink)?
//!     .on_ready(|addr| println!("preview at {}", addr.url));
//!
//! orchestrator.start().await?;
//! orchestrator.sync_channel().push("/src/App.jsx", "export default () => <h1>edited</h1>")?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod manifest;
mod orchestrator;
mod process;
mod readiness;
mod sandbox;
mod sync;
mod tree;

pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use error::{CoreError, LifecycleError, Result, Step, SyncError};
pub use manifest::{ProjectManifest, MANIFEST_PATH};
pub use orchestrator::{Orchestrator, Phase, SessionId};
pub use process::{
    CommandSpec, DiscardOutput, ExitStatus, KillSwitch, OutputChunk, OutputSender, OutputSink,
    OutputStream, ProcessHandle, ProcessId, ProcessIo,
};
pub use readiness::{ReadinessBridge, ReadyCallback, ReadySignal, ServerAddress};
pub use sandbox::{SandboxEnvironment, SandboxProvider};
pub use sync::{EditableDocument, FileSyncChannel, PushOutcome, SandboxSlot};
pub use tree::{normalize_path, split_path, Entry, FileContents, Node, VirtualFileTree};
