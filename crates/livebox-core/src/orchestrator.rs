//! Session lifecycle: boot → mount → install → start server → ready.
//!
//! Steps run strictly in sequence; each one starts only after the previous
//! step's result is available. Every terminal failure is captured in the
//! phase observable as data instead of escaping as a fault.

use crate::config::OrchestratorConfig;
use crate::error::{CoreError, LifecycleError, Step};
use crate::process::{KillSwitch, OutputSink, ProcessHandle};
use crate::readiness::{ReadinessBridge, ReadyCallback, ServerAddress};
use crate::sandbox::{SandboxEnvironment, SandboxProvider};
use crate::sync::{FileSyncChannel, SandboxSlot};
use crate::tree::VirtualFileTree;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Unique identifier for a preview session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-visible position in the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Booting,
    Mounting,
    Installing,
    Starting,
    /// The dev server announced an address.
    Ready,
    /// Install exited non-zero. Terminal.
    InstallFailed { exit_code: i32 },
    /// Any other terminal failure.
    Failed { error: LifecycleError },
}

impl Phase {
    /// Phases a caller renders as a loading state.
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Booting | Self::Mounting | Self::Installing | Self::Starting
        )
    }

    /// Terminal failure phases.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::InstallFailed { .. } | Self::Failed { .. })
    }

    /// The failure carried by a terminal phase.
    pub fn error(&self) -> Option<LifecycleError> {
        match self {
            Self::InstallFailed { exit_code } => Some(LifecycleError::Installation {
                exit_code: *exit_code,
            }),
            Self::Failed { error } => Some(error.clone()),
            _ => None,
        }
    }

    fn from_error(error: LifecycleError) -> Self {
        match error {
            LifecycleError::Installation { exit_code } => Self::InstallFailed { exit_code },
            error => Self::Failed { error },
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Booting => write!(f, "Booting"),
            Self::Mounting => write!(f, "Mounting"),
            Self::Installing => write!(f, "Installing"),
            Self::Starting => write!(f, "Starting"),
            Self::Ready => write!(f, "Ready"),
            Self::InstallFailed { exit_code } => write!(f, "InstallFailed({exit_code})"),
            Self::Failed { error } => write!(f, "Failed({error})"),
        }
    }
}

/// Run-once guard for [`Orchestrator::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl SessionState {
    /// Move to `InProgress`; only succeeds from `NotStarted`.
    fn begin(&mut self) -> bool {
        if *self == Self::NotStarted {
            *self = Self::InProgress;
            true
        } else {
            false
        }
    }
}

struct ServerProcess {
    kill: KillSwitch,
    monitor: JoinHandle<()>,
    ready_timer: Option<JoinHandle<()>>,
}

impl ServerProcess {
    /// Kill the server, cancel its ready timer and wait for its monitor.
    async fn stop(self, id: SessionId) {
        if let Some(timer) = self.ready_timer {
            timer.abort();
        }
        self.kill.kill();
        if let Err(e) = self.monitor.await {
            tracing::error!(session_id = %id, error = ?e, "Server monitor panicked");
        }
    }
}

/// Drives one sandbox through its lifecycle and exposes phase, error and
/// live preview address to the hosting surface.
pub struct Orchestrator {
    id: SessionId,
    config: OrchestratorConfig,
    provider: Arc<dyn SandboxProvider>,
    seed: Mutex<Option<VirtualFileTree>>,
    sink: Arc<dyn OutputSink>,
    on_ready: Option<ReadyCallback>,
    session: Mutex<SessionState>,
    phase: Arc<watch::Sender<Phase>>,
    sandbox: SandboxSlot,
    bridge: ReadinessBridge,
    server: tokio::sync::Mutex<Option<ServerProcess>>,
    sync: FileSyncChannel,
}

impl Orchestrator {
    /// Create an orchestrator for one session.
    ///
    /// `sink` receives install and server output chunks in arrival order.
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        tree: VirtualFileTree,
        config: OrchestratorConfig,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let sandbox = SandboxSlot::default();
        let sync = FileSyncChannel::new(&config.editable_path, Arc::clone(&sandbox))?;
        let (phase, _) = watch::channel(Phase::Idle);
        let id = SessionId::new();
        tracing::debug!(session_id = %id, files = tree.len(), "Creating orchestrator");

        Ok(Self {
            id,
            config,
            provider,
            seed: Mutex::new(Some(tree)),
            sink,
            on_ready: None,
            session: Mutex::new(SessionState::NotStarted),
            phase: Arc::new(phase),
            sandbox,
            bridge: ReadinessBridge::new(),
            server: tokio::sync::Mutex::new(None),
            sync,
        })
    }

    /// Callback invoked with every new live address (e.g. redirect a preview frame).
    pub fn on_ready(mut self, callback: impl Fn(&ServerAddress) + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Arc::new(callback));
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase.borrow().clone()
    }

    /// Observe phase changes.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Terminal failure, if any.
    pub fn error(&self) -> Option<LifecycleError> {
        self.phase.borrow().error()
    }

    /// Currently live preview address.
    pub fn address(&self) -> Option<ServerAddress> {
        self.bridge.address()
    }

    /// Observe live address changes.
    pub fn address_watch(&self) -> watch::Receiver<Option<ServerAddress>> {
        self.bridge.watch()
    }

    /// Channel for pushing editor changes. Usable before `start`; edits made
    /// before the sandbox boots are dropped.
    pub fn sync_channel(&self) -> FileSyncChannel {
        self.sync.clone()
    }

    /// The booted sandbox, once available.
    pub fn sandbox(&self) -> Option<Arc<dyn SandboxEnvironment>> {
        self.sandbox.get().cloned()
    }

    /// Run the lifecycle once.
    ///
    /// Returns after the dev server has been spawned; readiness arrives later
    /// through the phase observable. Calls after the first are no-ops.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let first = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .begin();
        if !first {
            tracing::debug!(session_id = %self.id, "Session already started");
            return Ok(());
        }

        let start = Instant::now();
        tracing::info!(session_id = %self.id, "Starting session");
        let result = self.run().await;

        let outcome = match &result {
            Ok(()) => {
                tracing::info!(
                    session_id = %self.id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Dev server launched"
                );
                SessionState::Completed
            }
            Err(e) => {
                tracing::error!(session_id = %self.id, error = %e, "Session failed");
                self.transition(Phase::from_error(e.clone()));
                SessionState::Failed
            }
        };
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = outcome;
        result
    }

    async fn run(&self) -> Result<(), LifecycleError> {
        // 1. Boot
        self.transition(Phase::Booting);
        let env = bounded(Step::Boot, self.config.boot_timeout, self.provider.boot())
            .await?
            .map_err(LifecycleError::boot)?;
        if self.sandbox.set(Arc::clone(&env)).is_err() {
            tracing::warn!(session_id = %self.id, "Sandbox slot already filled");
        }

        // 2. Mount the seed; the sandbox owns the files from here on
        self.transition(Phase::Mounting);
        let tree = self
            .seed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        bounded(Step::Mount, self.config.mount_timeout, env.mount(&tree))
            .await?
            .map_err(LifecycleError::mount)?;
        tracing::debug!(session_id = %self.id, files = tree.len(), "Project mounted");
        drop(tree);

        // 3. Install and branch on its exit code
        self.transition(Phase::Installing);
        self.install(&env).await?;

        // 4. Start the dev server without awaiting it. The slot stays locked
        // until the process is stored, so a restart cannot slip in between.
        let mut server = self.server.lock().await;
        self.transition(Phase::Starting);
        let mut process = match self.launch_server(&env).await {
            Ok(process) => process,
            Err(e) => {
                // Fail while still holding the slot so a waiting restart sees it.
                let error = LifecycleError::spawn(e);
                self.transition(Phase::from_error(error.clone()));
                return Err(error);
            }
        };
        process.ready_timer = self.arm_ready_timeout();
        *server = Some(process);
        Ok(())
    }

    async fn install(&self, env: &Arc<dyn SandboxEnvironment>) -> Result<(), LifecycleError> {
        let command = &self.config.install;
        let handle = env
            .spawn(command)
            .await
            .map_err(LifecycleError::spawn)?;
        tracing::info!(session_id = %self.id, process_id = %handle.id(), command = %command, "Installing dependencies");
        let kill = handle.kill_switch();

        let piped = bounded(
            Step::Install,
            self.config.install_timeout,
            handle.pipe_to(self.sink.as_ref()),
        )
        .await;
        let status = match piped {
            Ok(status) => status,
            Err(timeout) => {
                kill.kill();
                return Err(timeout);
            }
        };

        let exit_code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Install process lost");
                -1
            }
        };
        if exit_code != 0 {
            return Err(LifecycleError::Installation { exit_code });
        }
        tracing::info!(session_id = %self.id, "Dependencies installed");
        Ok(())
    }

    /// Spawn the dev server and (re)attach the readiness bridge.
    async fn launch_server(
        &self,
        env: &Arc<dyn SandboxEnvironment>,
    ) -> Result<ServerProcess, CoreError> {
        // Subscribe before spawning so an early announcement is not missed.
        let events = env.subscribe_ready();
        let handle = env.spawn(&self.config.run).await?;
        tracing::info!(
            session_id = %self.id,
            process_id = %handle.id(),
            command = %self.config.run,
            "Dev server spawned"
        );

        self.bridge.attach(events, self.ready_callback());
        let kill = handle.kill_switch();
        let monitor = tokio::spawn(monitor_server(
            self.id,
            handle,
            Arc::clone(&self.sink),
            Arc::clone(&self.phase),
        ));
        Ok(ServerProcess {
            kill,
            monitor,
            ready_timer: None,
        })
    }

    fn ready_callback(&self) -> ReadyCallback {
        let id = self.id;
        let phase = Arc::clone(&self.phase);
        let user = self.on_ready.clone();
        Arc::new(move |address: &ServerAddress| {
            let became_ready = phase.send_if_modified(|p| {
                if *p == Phase::Starting {
                    *p = Phase::Ready;
                    true
                } else {
                    false
                }
            });
            if became_ready {
                tracing::info!(session_id = %id, url = %address.url, "Session ready");
            }
            if let Some(callback) = &user {
                callback(address);
            }
        })
    }

    /// Fail with a `ServerReady` timeout if no address arrives in time.
    fn arm_ready_timeout(&self) -> Option<JoinHandle<()>> {
        let after = self.config.ready_timeout?;
        let id = self.id;
        let phase = Arc::clone(&self.phase);
        let mut rx = self.phase.subscribe();

        Some(tokio::spawn(async move {
            let settled = tokio::time::timeout(after, rx.wait_for(|p| *p != Phase::Starting))
                .await
                .is_ok();
            if settled {
                return;
            }
            let expired = phase.send_if_modified(|p| {
                if *p == Phase::Starting {
                    *p = Phase::Failed {
                        error: LifecycleError::Timeout {
                            step: Step::ServerReady,
                            after,
                        },
                    };
                    true
                } else {
                    false
                }
            });
            if expired {
                tracing::error!(session_id = %id, after_ms = after.as_millis() as u64, "Dev server never became ready");
            }
        }))
    }

    /// Kill the dev server and start a fresh one.
    ///
    /// Only valid while the session is `Starting` or `Ready`. The live address
    /// is cleared until the new server announces itself.
    pub async fn restart_server(&self) -> Result<(), CoreError> {
        let current = self.phase();
        let env = match (&current, self.sandbox.get()) {
            (Phase::Starting | Phase::Ready, Some(env)) => Arc::clone(env),
            _ => {
                return Err(CoreError::InvalidState {
                    expected: "Starting or Ready".into(),
                    actual: current.to_string(),
                })
            }
        };

        let mut server = self.server.lock().await;
        // The session may have failed while we waited for the slot.
        let current = self.phase();
        if !matches!(current, Phase::Starting | Phase::Ready) {
            return Err(CoreError::InvalidState {
                expected: "Starting or Ready".into(),
                actual: current.to_string(),
            });
        }
        if let Some(old) = server.take() {
            tracing::info!(session_id = %self.id, "Stopping dev server for restart");
            old.stop(self.id).await;
        }

        self.transition(Phase::Starting);
        match self.launch_server(&env).await {
            Ok(mut process) => {
                process.ready_timer = self.arm_ready_timeout();
                *server = Some(process);
                Ok(())
            }
            Err(e) => {
                tracing::error!(session_id = %self.id, error = %e, "Dev server restart failed");
                self.transition(Phase::Failed {
                    error: LifecycleError::Spawn {
                        message: e.to_string(),
                    },
                });
                Err(e)
            }
        }
    }

    /// Stop the dev server and the readiness subscription.
    pub async fn shutdown(&self) {
        tracing::info!(session_id = %self.id, "Shutting down session");
        self.bridge.detach();
        let server = self.server.lock().await.take();
        if let Some(server) = server {
            server.stop(self.id).await;
        }
    }

    fn transition(&self, next: Phase) {
        tracing::debug!(session_id = %self.id, phase = %next, "Phase transition");
        self.phase.send_replace(next);
    }
}

/// Pipe server output to the sink and report an unrequested exit.
async fn monitor_server(
    id: SessionId,
    handle: ProcessHandle,
    sink: Arc<dyn OutputSink>,
    phase: Arc<watch::Sender<Phase>>,
) {
    let kill = handle.kill_switch();
    let process_id = handle.id();
    let result = handle.pipe_to(sink.as_ref()).await;

    if kill.is_requested() {
        tracing::debug!(session_id = %id, process_id = %process_id, "Dev server stopped");
        return;
    }

    let exit_code = match result {
        Ok(status) => status.code(),
        Err(_) => -1,
    };
    tracing::warn!(session_id = %id, process_id = %process_id, exit_code, "Dev server exited unexpectedly");
    phase.send_if_modified(|p| {
        if p.is_failure() {
            false
        } else {
            *p = Phase::Failed {
                error: LifecycleError::ServerExited { exit_code },
            };
            true
        }
    });
}

/// Await `fut`, failing with a `Timeout` for `step` when `limit` elapses.
async fn bounded<T>(
    step: Step,
    limit: Option<Duration>,
    fut: impl Future<Output = T>,
) -> Result<T, LifecycleError> {
    match limit {
        None => Ok(fut.await),
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| LifecycleError::Timeout { step, after }),
    }
}
