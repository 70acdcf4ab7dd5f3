// src/exec/events.rs

//! Events flowing from running processes back to the control loop.

use std::fmt;

use tokio::sync::mpsc;
use tracing::trace;

/// Identifier handed out by a [`ProcessBackend`](super::ProcessBackend) for
/// every started process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immutable record pushed onto the process event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout { process: ProcessId, chunk: String },
    Stderr { process: ProcessId, chunk: String },
    /// Always the last event of a process; the exit code is available from
    /// the backend by the time this is received.
    Exited { process: ProcessId },
}

impl ProcessEvent {
    pub fn process(&self) -> ProcessId {
        match self {
            ProcessEvent::Stdout { process, .. }
            | ProcessEvent::Stderr { process, .. }
            | ProcessEvent::Exited { process } => *process,
        }
    }
}

/// Sending half of the process event queue.
pub type EventSender = mpsc::UnboundedSender<ProcessEvent>;
/// Receiving half of the process event queue; owned by the control loop.
pub type EventReceiver = mpsc::UnboundedReceiver<ProcessEvent>;

/// Create the multi-producer / single-consumer process event queue.
pub fn event_queue() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// The callbacks of one process, bound to its id.
///
/// Reader threads and tasks only ever talk to the control loop through
/// this sink. Sending never blocks; if the control loop is gone the events
/// are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    process: ProcessId,
    tx: EventSender,
}

impl EventSink {
    pub fn new(process: ProcessId, tx: EventSender) -> Self {
        Self { process, tx }
    }

    pub fn process(&self) -> ProcessId {
        self.process
    }

    pub fn stdout(&self, chunk: impl Into<String>) {
        self.send(ProcessEvent::Stdout {
            process: self.process,
            chunk: chunk.into(),
        });
    }

    pub fn stderr(&self, chunk: impl Into<String>) {
        self.send(ProcessEvent::Stderr {
            process: self.process,
            chunk: chunk.into(),
        });
    }

    pub fn exited(&self) {
        self.send(ProcessEvent::Exited {
            process: self.process,
        });
    }

    fn send(&self, event: ProcessEvent) {
        if self.tx.send(event).is_err() {
            trace!(process = %self.process, "event queue closed; dropping process event");
        }
    }
}
