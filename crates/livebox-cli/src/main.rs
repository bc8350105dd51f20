//! `livebox` entry point.
//!
//! Boots a host sandbox for a project directory, installs dependencies,
//! starts the dev server and mirrors edits of the editable file into it
//! until interrupted.
//!
//! Usage: `livebox [PROJECT_DIR]`. Everything else comes from `LIVEBOX_*`
//! environment variables, see [`LiveboxConfig::from_env`].

use anyhow::Context;
use livebox_cli::{load_tree, EditMirror, LiveboxConfig};
use livebox_core::{
    normalize_path, Orchestrator, OrchestratorConfig, OutputChunk, OutputSink, Phase,
    ProjectManifest,
};
use livebox_host::{HostConfig, HostProvider};
use std::io::Write;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Writes process output to stdout as it arrives.
struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write(&self, chunk: &OutputChunk) {
        let bytes: &[u8] = match chunk {
            OutputChunk::Text(text) => text.as_bytes(),
            OutputChunk::Binary(bytes) => &bytes[..],
        };
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(bytes).and_then(|()| stdout.flush());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries install and server output
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("livebox=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = LiveboxConfig::from_env();
    if let Some(project) = std::env::args_os().nth(1) {
        config.project = project.into();
    }
    tracing::info!(?config, "Configuration loaded");
    config.validate()?;

    let tree = load_tree(&config.project)
        .with_context(|| format!("failed to load project {}", config.project.display()))?;
    let manifest = ProjectManifest::from_tree(&tree)?;
    tracing::info!(
        name = manifest.name.as_deref().unwrap_or("<unnamed>"),
        install = %manifest.install,
        run = %manifest.run,
        "Project loaded"
    );

    let editable = normalize_path(&config.editable)?;
    let initial = tree
        .file(&editable)
        .map(|contents| contents.to_text().into_owned())
        .unwrap_or_default();

    let mut builder = OrchestratorConfig::from_manifest(&manifest).editable_path(editable);
    if let Some(timeout) = config.ready_timeout {
        builder = builder.ready_timeout(timeout);
    }
    if let Some(timeout) = config.install_timeout {
        builder = builder.install_timeout(timeout);
    }
    let orchestrator_config = builder.build()?;

    let provider = Arc::new(HostProvider::new(
        HostConfig::default()
            .with_root(&config.workdir)
            .keep_workdir(config.keep_workdir),
    ));
    let orchestrator = Arc::new(
        Orchestrator::new(provider, tree, orchestrator_config, Arc::new(StdoutSink))?.on_ready(
            |address| {
                tracing::info!(url = %address.url, port = address.port, "Preview available");
            },
        ),
    );

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut handles = Vec::new();

    // Phase logger
    {
        let mut phases = orchestrator.subscribe();
        let mut shutdown_rx = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = phases.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let phase = phases.borrow_and_update().clone();
                        if phase.is_failure() {
                            tracing::error!(%phase, "Session failed");
                        } else {
                            tracing::info!(%phase, "Phase changed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        }));
    }

    // Sync error reporter
    if let Some(mut errors) = orchestrator.sync_channel().take_errors() {
        let mut shutdown_rx = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(e) = errors.recv() => tracing::warn!(error = %e, "Edit not applied"),
                    _ = shutdown_rx.recv() => break,
                }
            }
        }));
    }

    // Edit mirror
    {
        let mirror = EditMirror::new(
            config.editable_on_disk(),
            orchestrator.sync_channel(),
            initial,
            config.sync_interval,
        );
        let mut shutdown_rx = shutdown_tx.subscribe();
        handles.push(tokio::spawn(mirror.run(async move {
            let _ = shutdown_rx.recv().await;
        })));
    }

    let started = tokio::select! {
        result = orchestrator.start() => Some(result),
        _ = signal::ctrl_c() => None,
    };
    let outcome = match started {
        Some(Ok(())) => {
            let mut phases = orchestrator.subscribe();
            tokio::select! {
                _ = signal::ctrl_c() => tracing::info!("Received shutdown signal, cleaning up..."),
                _ = phases.wait_for(Phase::is_failure) => {}
            }
            Ok(())
        }
        Some(Err(e)) => Err(anyhow::Error::from(e)),
        None => {
            tracing::info!("Interrupted during startup");
            Ok(())
        }
    };

    // Broadcast shutdown to background tasks
    let _ = shutdown_tx.send(());
    orchestrator.shutdown().await;

    let failure = orchestrator.error();
    drop(orchestrator);
    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("Shutdown complete");
    match (outcome, failure) {
        (Err(e), _) => Err(e),
        (Ok(()), Some(error)) => Err(error.into()),
        (Ok(()), None) => Ok(()),
    }
}
