//! End-to-end tests driving real `sh` processes in scratch directories.

use livebox_core::{
    CommandSpec, FileContents, LifecycleError, Orchestrator, OrchestratorConfig, OutputChunk,
    OutputSink, Phase, SandboxProvider, VirtualFileTree,
};
use livebox_host::{HostConfig, HostProvider};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn scratch_root() -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "livebox-host-test-{}-{}",
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh", ["-c", script])
}

fn project() -> VirtualFileTree {
    VirtualFileTree::from_files([
        ("package.json", r#"{"scripts":{"dev":"vite"}}"#),
        ("src/App.jsx", "export default () => null"),
    ])
    .unwrap()
}

fn collecting_sink() -> (Arc<Mutex<Vec<String>>>, Arc<dyn OutputSink>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink_lines = Arc::clone(&lines);
    let sink: Arc<dyn OutputSink> = Arc::new(move |chunk: &OutputChunk| {
        sink_lines.lock().unwrap().push(chunk.to_text().into_owned());
    });
    (lines, sink)
}

async fn wait_phase(orchestrator: &Orchestrator, f: impl Fn(&Phase) -> bool) -> Phase {
    let mut rx = orchestrator.subscribe();
    let phase = tokio::time::timeout(Duration::from_secs(20), rx.wait_for(|p| f(p)))
        .await
        .expect("phase not reached in time")
        .unwrap()
        .clone();
    phase
}

#[tokio::test]
async fn test_boot_creates_and_drop_removes_workdir() {
    let root = scratch_root();
    let provider = HostProvider::new(HostConfig::default().with_root(&root));

    let env = provider.boot().await.unwrap();
    env.mount(&project()).await.unwrap();
    assert_eq!(
        env.read_file("/src/App.jsx").await.unwrap(),
        FileContents::Text("export default () => null".into())
    );
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 1);

    drop(env);
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_keep_workdir() {
    let root = scratch_root();
    let provider = HostProvider::new(HostConfig::default().with_root(&root).keep_workdir(true));

    let env = provider.boot().await.unwrap();
    drop(env);
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 1);
    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_processes_run_in_workdir() {
    let root = scratch_root();
    let provider = HostProvider::new(HostConfig::default().with_root(&root));
    let env = provider.boot().await.unwrap();
    env.mount(&project()).await.unwrap();

    let (lines, sink) = collecting_sink();
    let status = env
        .spawn(&sh("cat src/App.jsx; echo"))
        .await
        .unwrap()
        .pipe_to(sink.as_ref())
        .await
        .unwrap();

    assert!(status.success());
    assert_eq!(*lines.lock().unwrap(), vec!["export default () => null\n"]);
    drop(env);
    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_session_reaches_ready_and_syncs_edits() {
    let root = scratch_root();
    let provider = Arc::new(HostProvider::new(HostConfig::default().with_root(&root)));
    let config = OrchestratorConfig::builder()
        .install(sh("echo installing deps"))
        .run(sh("echo 'ready at http://127.0.0.1:4173/'; exec sleep 30"))
        .editable_path("src/App.jsx")
        .ready_timeout(Duration::from_secs(20))
        .build()
        .unwrap();
    let (lines, sink) = collecting_sink();
    let orchestrator = Orchestrator::new(provider, project(), config, sink).unwrap();

    orchestrator.start().await.unwrap();
    wait_phase(&orchestrator, |p| *p == Phase::Ready).await;

    let address = orchestrator.address().expect("address published");
    assert_eq!(address.port, 4173);
    assert_eq!(address.url, "http://127.0.0.1:4173/");
    assert_eq!(lines.lock().unwrap()[0], "installing deps\n");

    let sync = orchestrator.sync_channel();
    sync.push("/src/App.jsx", "export default () => 'edited'")
        .unwrap();
    sync.flush().await;
    let env = orchestrator.sandbox().unwrap();
    assert_eq!(
        env.read_file("src/App.jsx").await.unwrap(),
        FileContents::Text("export default () => 'edited'".into())
    );

    orchestrator.shutdown().await;
    assert_eq!(orchestrator.phase(), Phase::Ready);
    drop(env);
    drop(orchestrator);
    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_failing_install_is_reported() {
    let root = scratch_root();
    let provider = Arc::new(HostProvider::new(HostConfig::default().with_root(&root)));
    let config = OrchestratorConfig::builder()
        .install(sh("echo 'ERR! missing peer' >&2; exit 2"))
        .run(sh("exec sleep 30"))
        .editable_path("src/App.jsx")
        .build()
        .unwrap();
    let (lines, sink) = collecting_sink();
    let orchestrator = Orchestrator::new(provider, project(), config, sink).unwrap();

    let err = orchestrator.start().await.unwrap_err();
    assert_eq!(err, LifecycleError::Installation { exit_code: 2 });
    assert_eq!(orchestrator.phase(), Phase::InstallFailed { exit_code: 2 });
    assert_eq!(*lines.lock().unwrap(), vec!["ERR! missing peer\n"]);
    drop(orchestrator);
    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_server_crash_is_reported() {
    let root = scratch_root();
    let provider = Arc::new(HostProvider::new(HostConfig::default().with_root(&root)));
    let config = OrchestratorConfig::builder()
        .install(sh("true"))
        .run(sh("echo 'Cannot find module vite'; exit 1"))
        .editable_path("src/App.jsx")
        .build()
        .unwrap();
    let (_, sink) = collecting_sink();
    let orchestrator = Orchestrator::new(provider, project(), config, sink).unwrap();

    orchestrator.start().await.unwrap();
    let phase = wait_phase(&orchestrator, Phase::is_failure).await;
    assert_eq!(
        phase.error(),
        Some(LifecycleError::ServerExited { exit_code: 1 })
    );
    drop(orchestrator);
    std::fs::remove_dir_all(root).ok();
}
