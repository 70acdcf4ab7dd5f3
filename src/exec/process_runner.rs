// src/exec/process_runner.rs

//! Individual process runner.

use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::backend::ExitCodes;
use super::events::EventSink;

const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Build a shell command appropriate for the platform, with piped output.
pub(crate) fn shell_command(command: &str) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Drive one child process to completion.
///
/// Both pipes are pumped into the event queue as raw chunks. The exit code
/// is published and the `Exited` event sent only after both pumps have
/// drained their pipe, so no output can arrive after the exit.
///
/// If the cancel channel fires the child is killed; it still exits through
/// the regular path (with a failing exit code).
pub(crate) async fn run_process(
    mut child: Child,
    sink: EventSink,
    exit_codes: ExitCodes,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let process = sink.process();

    let stdout_pump = child
        .stdout
        .take()
        .map(|out| tokio::spawn(pump(out, sink.clone(), Stream::Stdout)));
    let stderr_pump = child
        .stderr
        .take()
        .map(|err| tokio::spawn(pump(err, sink.clone(), Stream::Stderr)));

    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut cancel_rx => {
            info!(%process, "kill requested; killing process");
            if let Err(e) = child.kill().await {
                warn!(%process, error = %e, "failed to kill child process");
            }
            child.wait().await
        }
    };

    for handle in [stdout_pump, stderr_pump].into_iter().flatten() {
        if let Err(e) = handle.await {
            warn!(%process, error = %e, "output pump task failed");
        }
    }

    let code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            warn!(%process, error = %e, "waiting for process failed");
            -1
        }
    };
    info!(%process, exit_code = code, "process exited");

    match exit_codes.lock() {
        Ok(mut codes) => {
            codes.insert(process, code);
        }
        Err(poisoned) => {
            poisoned.into_inner().insert(process, code);
        }
    }
    sink.exited();
}

async fn pump<R>(mut reader: R, sink: EventSink, stream: Stream)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    // Bytes of a UTF-8 sequence split across two reads.
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(process = %sink.process(), ?stream, error = %e, "read failed; stopping pump");
                break;
            }
        };

        pending.extend_from_slice(&buf[..n]);
        let valid = complete_prefix_len(&pending);
        let chunk = String::from_utf8_lossy(&pending[..valid]).into_owned();
        pending.drain(..valid);
        emit(&sink, stream, chunk);
    }

    if !pending.is_empty() {
        emit(&sink, stream, String::from_utf8_lossy(&pending).into_owned());
    }
}

/// Length of the prefix of `bytes` that can be decoded now.
///
/// Invalid bytes are part of the prefix (they decode lossily); only a
/// trailing incomplete sequence is held back for the next read.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let mut start = 0;
    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(_) => return bytes.len(),
            Err(e) => match e.error_len() {
                Some(invalid) => start += e.valid_up_to() + invalid,
                None => return start + e.valid_up_to(),
            },
        }
    }
}

fn emit(sink: &EventSink, stream: Stream, chunk: String) {
    if chunk.is_empty() {
        return;
    }
    match stream {
        Stream::Stdout => sink.stdout(chunk),
        Stream::Stderr => sink.stderr(chunk),
    }
}
