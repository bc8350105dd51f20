//! Scripted in-memory sandbox shared by the integration tests.
//!
//! Every provider/environment call is appended to a log so tests can assert
//! on call counts and ordering.

#![allow(dead_code)]

use async_trait::async_trait;
use livebox_core::{
    normalize_path, CommandSpec, CoreError, FileContents, Orchestrator, OrchestratorConfig,
    OutputChunk, OutputSink, Phase, ProcessHandle, ReadySignal, SandboxEnvironment,
    SandboxProvider, ServerAddress, VirtualFileTree,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

/// One recorded interaction with the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    BootStart,
    BootEnd,
    MountStart,
    MountEnd,
    Spawn(String),
    Write(String),
    /// A dev server process ended with this code.
    ServerExit(i32),
}

/// How one dev server run behaves.
#[derive(Debug, Clone, Default)]
pub struct ServerRun {
    /// Output lines emitted right after spawn.
    pub output: Vec<String>,
    /// Readiness events, each after a delay relative to the previous one.
    pub ready: Vec<(Duration, ServerAddress)>,
    /// Exit on its own after a delay with a code.
    pub crash: Option<(Duration, i32)>,
}

impl ServerRun {
    pub fn ready_after(delay: Duration, port: u16, url: &str) -> Self {
        Self {
            ready: vec![(delay, ServerAddress::new(port, url))],
            ..Default::default()
        }
    }
}

/// Behavior knobs for [`ScriptedSandbox`].
#[derive(Debug, Default)]
pub struct Script {
    pub boot_gate: Option<Arc<Notify>>,
    pub boot_error: Option<String>,
    pub mount_error: Option<String>,
    /// Mount never completes.
    pub mount_hangs: bool,
    pub install_output: Vec<String>,
    pub install_exit: i32,
    /// Install never exits unless killed.
    pub install_hangs: bool,
    /// Spawning the run command fails.
    pub server_spawn_error: Option<String>,
    /// The first run-command spawn blocks until notified.
    pub server_spawn_gate: Option<Arc<Notify>>,
    /// Consumed one per server spawn.
    pub server_runs: VecDeque<ServerRun>,
    /// Consumed one per write; missing entries mean no delay.
    pub write_delays: VecDeque<Duration>,
    pub write_error: Option<String>,
}

pub struct ScriptedSandbox {
    script: Mutex<Script>,
    log: Arc<Mutex<Vec<Call>>>,
    files: Mutex<BTreeMap<String, FileContents>>,
    ready: ReadySignal,
}

impl ScriptedSandbox {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            log: Arc::new(Mutex::new(Vec::new())),
            files: Mutex::new(BTreeMap::new()),
            ready: ReadySignal::new(),
        })
    }

    pub fn provider(self: &Arc<Self>) -> Arc<dyn SandboxProvider> {
        Arc::new(ScriptedProvider {
            sandbox: Arc::clone(self),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|c| c.to_text().into_owned())
    }

    /// Emit a readiness event directly, as if a server announced itself.
    pub fn announce(&self, port: u16, url: &str) {
        self.ready.emit(ServerAddress::new(port, url));
    }

    fn record(&self, call: Call) {
        self.log.lock().unwrap().push(call);
    }

    fn spawn_install(&self, command: &CommandSpec) -> ProcessHandle {
        let (handle, mut io) = ProcessHandle::channel(command.clone());
        let (output, exit, hangs) = {
            let script = self.script.lock().unwrap();
            (
                script.install_output.clone(),
                script.install_exit,
                script.install_hangs,
            )
        };
        tokio::spawn(async move {
            for line in output {
                io.emit(line);
                tokio::task::yield_now().await;
            }
            if hangs {
                io.kill_requested().await;
                io.finish(137);
            } else {
                io.finish(exit);
            }
        });
        handle
    }

    fn spawn_server(&self, command: &CommandSpec) -> ProcessHandle {
        let (handle, mut io) = ProcessHandle::channel(command.clone());
        let run = self
            .script
            .lock()
            .unwrap()
            .server_runs
            .pop_front()
            .unwrap_or_default();
        let ready = self.ready.clone();
        let log = Arc::clone(&self.log);

        tokio::spawn(async move {
            for line in run.output {
                io.emit(line);
            }
            let announce = async {
                for (delay, address) in run.ready {
                    tokio::time::sleep(delay).await;
                    ready.emit(address);
                }
                std::future::pending::<()>().await;
            };
            let crash = async {
                match run.crash {
                    Some((delay, code)) => {
                        tokio::time::sleep(delay).await;
                        code
                    }
                    None => std::future::pending().await,
                }
            };
            let code = tokio::select! {
                _ = io.kill_requested() => 143,
                code = crash => code,
                _ = announce => unreachable!("announce never completes"),
            };
            log.lock().unwrap().push(Call::ServerExit(code));
            io.finish(code);
        });
        handle
    }
}

struct ScriptedProvider {
    sandbox: Arc<ScriptedSandbox>,
}

#[async_trait]
impl SandboxProvider for ScriptedProvider {
    async fn boot(&self) -> livebox_core::Result<Arc<dyn SandboxEnvironment>> {
        self.sandbox.record(Call::BootStart);
        let (gate, error) = {
            let script = self.sandbox.script.lock().unwrap();
            (script.boot_gate.clone(), script.boot_error.clone())
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        tokio::task::yield_now().await;
        if let Some(message) = error {
            return Err(CoreError::Boot(message));
        }
        self.sandbox.record(Call::BootEnd);
        Ok(self.sandbox.clone() as Arc<dyn SandboxEnvironment>)
    }
}

#[async_trait]
impl SandboxEnvironment for ScriptedSandbox {
    async fn mount(&self, tree: &VirtualFileTree) -> livebox_core::Result<()> {
        self.record(Call::MountStart);
        let (error, hangs) = {
            let script = self.script.lock().unwrap();
            (script.mount_error.clone(), script.mount_hangs)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        if let Some(message) = error {
            return Err(CoreError::Mount {
                path: "/".into(),
                message,
            });
        }
        for entry in tree.entries() {
            if let livebox_core::Entry::File(path, contents) = entry {
                self.files.lock().unwrap().insert(path, contents.clone());
            }
            tokio::task::yield_now().await;
        }
        self.record(Call::MountEnd);
        Ok(())
    }

    async fn spawn(&self, command: &CommandSpec) -> livebox_core::Result<ProcessHandle> {
        self.record(Call::Spawn(command.to_string()));
        if command.args.iter().any(|a| a == "install") {
            return Ok(self.spawn_install(command));
        }
        let (error, gate) = {
            let mut script = self.script.lock().unwrap();
            (
                script.server_spawn_error.clone(),
                script.server_spawn_gate.take(),
            )
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(message) = error {
            return Err(CoreError::Spawn {
                command: command.to_string(),
                message,
            });
        }
        Ok(self.spawn_server(command))
    }

    async fn write_file(&self, path: &str, contents: &FileContents) -> livebox_core::Result<()> {
        let path = normalize_path(path)?;
        let (delay, error) = {
            let mut script = self.script.lock().unwrap();
            (script.write_delays.pop_front(), script.write_error.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = error {
            return Err(CoreError::Mount { path, message });
        }
        self.record(Call::Write(path.clone()));
        self.files.lock().unwrap().insert(path, contents.clone());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> livebox_core::Result<FileContents> {
        let path = normalize_path(path)?;
        self.files
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .ok_or(CoreError::NotFound(path))
    }

    fn subscribe_ready(&self) -> broadcast::Receiver<ServerAddress> {
        self.ready.subscribe()
    }
}

/// Sink that records every chunk as text.
#[derive(Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn chunks(&self) -> Vec<String> {
        self.chunks.lock().unwrap().clone()
    }
}

impl OutputSink for RecordingSink {
    fn write(&self, chunk: &OutputChunk) {
        self.chunks.lock().unwrap().push(chunk.to_text().into_owned());
    }
}

pub const INSTALL: &str = "npm install";
pub const RUN_DEV: &str = "npm run dev";

pub fn project() -> VirtualFileTree {
    VirtualFileTree::from_files([
        ("package.json", r#"{"scripts":{"dev":"vite"}}"#),
        ("index.html", "<div id=root></div>"),
        ("src/App.jsx", "export default () => null"),
    ])
    .unwrap()
}

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig::builder()
        .editable_path("/src/App.jsx")
        .build()
        .unwrap()
}

pub fn orchestrator(sandbox: &Arc<ScriptedSandbox>, sink: Arc<RecordingSink>) -> Orchestrator {
    Orchestrator::new(sandbox.provider(), project(), config(), sink).unwrap()
}

/// Orchestrator with a custom config and a discarding sink.
pub fn orchestrator_with(sandbox: &Arc<ScriptedSandbox>, config: OrchestratorConfig) -> Orchestrator {
    Orchestrator::new(
        sandbox.provider(),
        project(),
        config,
        Arc::new(RecordingSink::default()),
    )
    .unwrap()
}

/// Wait until the phase satisfies `f`, returning it.
pub async fn wait_phase(orchestrator: &Orchestrator, f: impl Fn(&Phase) -> bool) -> Phase {
    let mut rx = orchestrator.subscribe();
    let phase = rx.wait_for(|p| f(p)).await.unwrap().clone();
    phase
}
