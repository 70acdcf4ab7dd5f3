// src/exec/backend.rs

//! Pluggable OS process boundary.
//!
//! The pipeline talks to a `ProcessBackend` instead of spawning processes
//! itself. This makes it easy to swap in a fake backend in tests while
//! keeping the production implementation on top of `tokio::process`.
//!
//! - `TokioProcessBackend` is the implementation used by `taskdeck`. Every
//!   started process gets its own Tokio task (see [`process_runner`]) that
//!   pumps stdout/stderr into the event queue and reports the exit.
//! - Tests can provide their own `ProcessBackend` that records which
//!   commands were started and replays scripted output.
//!
//! [`process_runner`]: super::process_runner

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::errors::Result;

use super::events::{EventSender, EventSink, ProcessId};
use super::process_runner::{run_process, shell_command};

/// Trait abstracting how shell commands are turned into processes.
///
/// Production code uses [`TokioProcessBackend`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait ProcessBackend: Send {
    /// Start `command` through the shell.
    ///
    /// Output and the final exit notification are delivered through the
    /// event queue the backend was created with, tagged with the returned id.
    fn start_process(&mut self, command: &str) -> Result<ProcessId>;

    /// Kill a running process. Its `Exited` event still follows.
    fn kill_process(&mut self, process: ProcessId);

    /// Exit code of a process that has exited; `None` while it is running.
    ///
    /// The code is handed out once and then forgotten.
    fn take_exit_code(&mut self, process: ProcessId) -> Option<i32>;

    /// Start `command` without tracking it (e.g. a debugger in its own
    /// terminal).
    fn spawn_detached(&mut self, command: &str) -> Result<()>;
}

/// Exit codes published by process runners, keyed by process.
pub(crate) type ExitCodes = Arc<Mutex<HashMap<ProcessId, i32>>>;

/// Real backend used in production.
///
/// Must be used from within a Tokio runtime.
pub struct TokioProcessBackend {
    events: EventSender,
    next_id: u64,
    cancels: HashMap<ProcessId, oneshot::Sender<()>>,
    exit_codes: ExitCodes,
}

impl TokioProcessBackend {
    /// Create a new backend publishing into the given event queue.
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            next_id: 1,
            cancels: HashMap::new(),
            exit_codes: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl ProcessBackend for TokioProcessBackend {
    fn start_process(&mut self, command: &str) -> Result<ProcessId> {
        let process = ProcessId(self.next_id);
        self.next_id += 1;

        let child = shell_command(command)
            .spawn()
            .with_context(|| format!("spawning process for `{command}`"))?;

        info!(%process, cmd = %command, "started process");

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancels.retain(|_, tx| !tx.is_closed());
        self.cancels.insert(process, cancel_tx);

        let sink = EventSink::new(process, self.events.clone());
        let exit_codes = Arc::clone(&self.exit_codes);
        tokio::spawn(async move {
            run_process(child, sink, exit_codes, cancel_rx).await;
        });

        Ok(process)
    }

    fn kill_process(&mut self, process: ProcessId) {
        match self.cancels.remove(&process) {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    debug!(%process, "process already finished while killing");
                }
            }
            None => debug!(%process, "no running process to kill"),
        }
    }

    fn take_exit_code(&mut self, process: ProcessId) -> Option<i32> {
        match self.exit_codes.lock() {
            Ok(mut codes) => codes.remove(&process),
            Err(poisoned) => poisoned.into_inner().remove(&process),
        }
    }

    fn spawn_detached(&mut self, command: &str) -> Result<()> {
        let mut cmd = shell_command(command);
        cmd.stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(false);

        match cmd.spawn() {
            Ok(_child) => {
                info!(cmd = %command, "started detached process");
                Ok(())
            }
            Err(e) => {
                warn!(cmd = %command, error = %e, "failed to start detached process");
                Err(anyhow::Error::from(e)
                    .context(format!("spawning detached process for `{command}`"))
                    .into())
            }
        }
    }
}
