//! Child process spawning with streamed output.

use crate::detect::detect_address;
use livebox_core::{
    CommandSpec, CoreError, OutputChunk, OutputSender, ProcessHandle, ReadySignal, Result,
};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// How long output may keep flowing after the child exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Start `command` in `workdir`.
///
/// Stdout and stderr are forwarded line by line, byte for byte, to the
/// handle's output stream. The first line naming a loopback URL is announced on `ready`,
/// at most once per process.
pub(crate) fn spawn_process(
    workdir: &Path,
    env: &[(String, String)],
    command: &CommandSpec,
    ready: ReadySignal,
) -> Result<ProcessHandle> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .current_dir(workdir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CoreError::Spawn {
            command: command.to_string(),
            message: e.to_string(),
        })?;

    let (handle, mut io) = ProcessHandle::channel(command.clone());
    let process_id = io.id();
    debug!(
        process_id = %process_id,
        pid = ?child.id(),
        command = %command,
        "Spawned process"
    );

    let announced = Arc::new(AtomicBool::new(false));
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, io.sender(), ready.clone(), announced.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, io.sender(), ready, announced));
    }

    tokio::spawn(async move {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = io.kill_requested() => None,
        };
        let status = match exited {
            Some(status) => status,
            None => {
                debug!(process_id = %process_id, "Kill requested");
                if let Err(e) = child.start_kill() {
                    warn!(process_id = %process_id, error = %e, "Failed to signal process");
                }
                child.wait().await
            }
        };

        // Readers hit EOF once the child and any grandchildren close the pipes.
        // A grandchild that outlives the child would hold them open forever.
        for mut reader in readers {
            if tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut reader).await.is_err() {
                warn!(process_id = %process_id, "Output still open after exit, detaching");
                reader.abort();
            }
        }

        let code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                warn!(process_id = %process_id, error = %e, "Failed to wait for process");
                -1
            }
        };
        debug!(process_id = %process_id, exit_code = code, "Process exited");
        io.finish(code);
    });

    Ok(handle)
}

fn spawn_reader<R>(
    stream: R,
    output: OutputSender,
    ready: ReadySignal,
    announced: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(read) => {
                    trace!(bytes = read, "Process output");
                    let address = if announced.load(Ordering::Acquire) {
                        None
                    } else {
                        detect_address(&String::from_utf8_lossy(&line))
                    };
                    // Forwarded as read: line ending kept, non-UTF-8 sent as binary.
                    output.send(OutputChunk::from_raw(std::mem::take(&mut line)));
                    if let Some(address) = address {
                        if !announced.swap(true, Ordering::AcqRel) {
                            ready.emit(address);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read process output");
                    break;
                }
            }
        }
    })
}
