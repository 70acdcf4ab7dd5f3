use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use taskdeck::errors::Result;
use taskdeck::exec::{EventSender, EventSink, ProcessBackend, ProcessId};

/// Scripted outcome of one fake process.
#[derive(Debug, Clone, Default)]
pub struct FakeRun {
    stdout: Vec<String>,
    stderr: Vec<String>,
    exit_code: i32,
}

impl FakeRun {
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    /// Add a raw stdout chunk (need not end in a newline).
    pub fn stdout(mut self, chunk: &str) -> Self {
        self.stdout.push(chunk.to_string());
        self
    }

    pub fn stderr(mut self, chunk: &str) -> Self {
        self.stderr.push(chunk.to_string());
        self
    }
}

/// A fake OS boundary that:
/// - records which commands were started (and started detached)
/// - immediately replays the scripted output and exit of every process
///   into the event queue.
///
/// Commands without a script print nothing and exit with 0. A command can
/// have several scripted runs; they are used in order and the last one
/// repeats. Held commands never exit on their own, only when killed.
pub struct FakeProcessBackend {
    events: EventSender,
    next_id: u64,
    scripts: HashMap<String, VecDeque<FakeRun>>,
    unstartable: HashSet<String>,
    held: HashSet<String>,
    running: HashSet<ProcessId>,
    exit_codes: HashMap<ProcessId, i32>,
    started: Arc<Mutex<Vec<String>>>,
    detached: Arc<Mutex<Vec<String>>>,
}

impl FakeProcessBackend {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            next_id: 1,
            scripts: HashMap::new(),
            unstartable: HashSet::new(),
            held: HashSet::new(),
            running: HashSet::new(),
            exit_codes: HashMap::new(),
            started: Arc::new(Mutex::new(Vec::new())),
            detached: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn script(mut self, command: &str, run: FakeRun) -> Self {
        self.scripts
            .entry(command.to_string())
            .or_default()
            .push_back(run);
        self
    }

    /// Make `start_process` fail for `command`.
    pub fn unstartable(mut self, command: &str) -> Self {
        self.unstartable.insert(command.to_string());
        self
    }

    /// Keep `command` running until it is killed.
    pub fn hold(mut self, command: &str) -> Self {
        self.held.insert(command.to_string());
        self
    }

    /// Commands passed to `start_process`, in order.
    pub fn started(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.started)
    }

    /// Commands passed to `spawn_detached`, in order.
    pub fn detached(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.detached)
    }

    fn next_run(&mut self, command: &str) -> FakeRun {
        match self.scripts.get_mut(command) {
            Some(runs) if runs.len() > 1 => runs.pop_front().unwrap_or_default(),
            Some(runs) => runs.front().cloned().unwrap_or_default(),
            None => FakeRun::default(),
        }
    }
}

impl ProcessBackend for FakeProcessBackend {
    fn start_process(&mut self, command: &str) -> Result<ProcessId> {
        self.started.lock().unwrap().push(command.to_string());

        if self.unstartable.contains(command) {
            return Err(anyhow::anyhow!("cannot start `{command}`").into());
        }

        let process = ProcessId(self.next_id);
        self.next_id += 1;

        let run = self.next_run(command);
        let sink = EventSink::new(process, self.events.clone());
        for chunk in run.stdout {
            sink.stdout(chunk);
        }
        for chunk in run.stderr {
            sink.stderr(chunk);
        }

        if self.held.contains(command) {
            self.running.insert(process);
        } else {
            self.exit_codes.insert(process, run.exit_code);
            sink.exited();
        }
        Ok(process)
    }

    fn kill_process(&mut self, process: ProcessId) {
        if self.running.remove(&process) {
            self.exit_codes.insert(process, -1);
            EventSink::new(process, self.events.clone()).exited();
        }
    }

    fn take_exit_code(&mut self, process: ProcessId) -> Option<i32> {
        self.exit_codes.remove(&process)
    }

    fn spawn_detached(&mut self, command: &str) -> Result<()> {
        self.detached.lock().unwrap().push(command.to_string());
        Ok(())
    }
}
