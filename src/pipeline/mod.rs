// src/pipeline/mod.rs

//! Execution pipeline.
//!
//! Turns run requests into executions, runs them one at a time through the
//! [`ProcessBackend`], folds process events into their output buffers and
//! state, and keeps finished executions in a bounded history.
//!
//! The pipeline is synchronous. It never waits for anything: the caller
//! feeds it [`ProcessEvent`]s from the event queue and decides when to call
//! [`Pipeline::start_next`] and [`Pipeline::finish_settled_executions`].
//! Text for the user is queued and picked up with [`Pipeline::take_output`].

pub mod execution;
pub mod history;

pub use execution::{BatchId, Execution, ExecutionId, OutputStream};
pub use history::History;

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::model::ConfigFile;
use crate::dag::{TaskIndex, TaskList};
use crate::errors::{Result, TaskdeckError};
use crate::exec::{ProcessBackend, ProcessEvent, ProcessId};
use crate::gtest::{GtestEvent, GtestExecution};
use crate::types::{ExecutionState, RunModifiers};

/// Marker message of executions handed to the debugger.
pub const DEBUGGER_STARTED: &str = "Debugger started";

/// Settings the debugger modifier depends on.
#[derive(Debug, Clone, Default)]
pub struct DebuggerSettings {
    pub debug_command: Option<String>,
    pub terminal_command: Option<String>,
}

impl DebuggerSettings {
    /// Names of the settings that still need to be configured.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.debug_command.is_none() {
            missing.push("debug_command");
        }
        if self.terminal_command.is_none() {
            missing.push("terminal_command");
        }
        missing
    }

    /// Command that opens `shell_command` under the debugger in a separate
    /// terminal.
    pub fn launch_command(&self, shell_command: &str) -> Option<String> {
        let debug = self.debug_command.as_ref()?;
        let terminal = self.terminal_command.as_ref()?;
        let debug = debug.replace("{shell_command}", shell_command);
        Some(terminal.replace("{command}", &debug))
    }
}

pub struct Pipeline {
    tasks: TaskList,
    debugger: DebuggerSettings,
    backend: Box<dyn ProcessBackend>,
    executions: HashMap<ExecutionId, Execution>,
    run_queue: VecDeque<ExecutionId>,
    history: History,
    next_execution: u64,
    next_batch: BatchId,
    output: Vec<String>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("tasks", &self.tasks.len())
            .field("run_queue", &self.run_queue)
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(cfg: &ConfigFile, backend: Box<dyn ProcessBackend>) -> Self {
        Self {
            tasks: TaskList::from_config(cfg),
            debugger: DebuggerSettings {
                debug_command: cfg.config.debug_command.clone(),
                terminal_command: cfg.config.terminal_command.clone(),
            },
            backend,
            executions: HashMap::new(),
            run_queue: VecDeque::new(),
            history: History::new(cfg.config.history_limit),
            next_execution: 1,
            next_batch: 1,
            output: Vec::new(),
        }
    }

    pub fn tasks(&self) -> &TaskList {
        &self.tasks
    }

    pub fn execution(&self, id: ExecutionId) -> Option<&Execution> {
        self.executions.get(&id)
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Finished executions, most recent first.
    pub fn history_entries(&self) -> impl Iterator<Item = &Execution> {
        self.history
            .iter()
            .filter_map(|id| self.executions.get(&id))
    }

    /// Pending executions, the one currently running (if any) first.
    pub fn run_queue(&self) -> impl Iterator<Item = &Execution> {
        self.run_queue
            .iter()
            .filter_map(|id| self.executions.get(id))
    }

    pub fn run_queue_len(&self) -> usize {
        self.run_queue.len()
    }

    /// Head of the run queue.
    pub fn current(&self) -> Option<&Execution> {
        self.run_queue
            .front()
            .and_then(|id| self.executions.get(id))
    }

    /// Whether a process is starting or running right now.
    pub fn has_active_process(&self) -> bool {
        self.current().is_some_and(|e| e.state.is_active())
    }

    /// Drain queued user-facing text.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Settings still missing before anything can run under the debugger.
    pub fn missing_debugger_settings(&self) -> Vec<&'static str> {
        self.debugger.missing()
    }

    /// Queue `task` behind all of its pre-tasks as one batch.
    ///
    /// Only the final entry (the task itself) carries `modifiers`.
    pub fn enqueue_task(&mut self, task: TaskIndex, modifiers: RunModifiers) -> Result<BatchId> {
        let pre_tasks = match self.tasks.get(task) {
            Some(t) => t.pre_tasks.clone(),
            None => return Err(TaskdeckError::TaskNotFound(format!("#{}", task + 1))),
        };

        let batch = self.new_batch();
        for pre_task in pre_tasks {
            self.push_execution(pre_task, RunModifiers::default(), batch, None, None);
        }
        self.push_execution(task, modifiers, batch, None, None);

        debug!(task, batch, queued = self.run_queue.len(), "enqueued task batch");
        Ok(batch)
    }

    /// Queue a run of a single test of a finished test execution, filtered
    /// with `--gtest_filter`.
    ///
    /// Returns `None` if the execution or the test does not exist.
    pub fn enqueue_test_rerun(
        &mut self,
        source: ExecutionId,
        test_index: usize,
        under_debugger: bool,
    ) -> Option<BatchId> {
        let (task, test_name) = {
            let exec = self.executions.get(&source)?;
            let test = exec.gtest.as_ref()?.tests.get(test_index)?;
            (exec.task, test.name.clone())
        };
        let base_command = self.tasks.get(task)?.command.clone();
        let command = format!("{base_command} --gtest_filter={test_name}");

        let modifiers = RunModifiers {
            stream_output_live: true,
            repeat_until_fail: false,
            run_under_debugger: under_debugger,
        };
        let batch = self.new_batch();
        self.push_execution(task, modifiers, batch, Some(command), Some(test_name));
        Some(batch)
    }

    /// Start the head of the run queue if it is waiting.
    ///
    /// Does nothing if the queue is empty or its head is already running or
    /// settled. Returns the execution if a process was started; executions
    /// handed to the debugger or failing to spawn settle immediately and
    /// return `None`.
    pub fn start_next(&mut self) -> Option<ExecutionId> {
        let id = *self.run_queue.front()?;
        let exec = self.executions.get_mut(&id)?;
        if exec.state != ExecutionState::Queued {
            return None;
        }

        exec.state = ExecutionState::Starting;
        exec.start_time = Some(Instant::now());

        if exec.modifiers.run_under_debugger {
            self.start_under_debugger(id);
            return None;
        }

        match self.backend.start_process(&exec.shell_command) {
            Ok(process) => {
                exec.process = Some(process);
                exec.state = ExecutionState::Running;
                info!(execution = %id, %process, task = %exec.display_name, "execution running");
                if exec.attempt > 1 {
                    self.output
                        .push(format!("Running \"{}\" (attempt {})", exec.display_name, exec.attempt));
                } else {
                    self.output.push(format!("Running \"{}\"", exec.display_name));
                }
                Some(id)
            }
            Err(e) => {
                warn!(execution = %id, error = %e, "failed to start process");
                exec.state = ExecutionState::Failed;
                exec.message = Some(e.to_string());
                None
            }
        }
    }

    /// Fold one process event into the execution it belongs to.
    ///
    /// Returns the execution if the event settled it (the process exited).
    pub fn handle_event(&mut self, event: ProcessEvent) -> Option<ExecutionId> {
        let process = event.process();
        let Some(id) = self.execution_of(process) else {
            debug!(%process, "event for a process without a running execution; ignoring");
            return None;
        };

        match event {
            ProcessEvent::Stdout { chunk, .. } => {
                self.append_output(id, OutputStream::Stdout, &chunk);
                None
            }
            ProcessEvent::Stderr { chunk, .. } => {
                self.append_output(id, OutputStream::Stderr, &chunk);
                None
            }
            ProcessEvent::Exited { process } => {
                self.settle(id, process);
                Some(id)
            }
        }
    }

    /// Move settled executions from the run queue into history.
    ///
    /// A failure discards the not yet started rest of its batch. A completed
    /// repeat-until-fail execution is queued again instead.
    pub fn finish_settled_executions(&mut self) {
        while let Some(&id) = self.run_queue.front() {
            let Some(exec) = self.executions.get_mut(&id) else {
                self.run_queue.pop_front();
                continue;
            };
            if !exec.state.is_settled() {
                break;
            }

            if exec.state == ExecutionState::Complete && exec.modifiers.repeat_until_fail {
                let attempt = exec.attempt;
                let name = exec.display_name.clone();
                exec.reset_for_repeat();
                debug!(execution = %id, attempt, "repeat-until-fail: queued again");
                self.output
                    .push(format!("\"{name}\" complete (attempt {attempt}); running again"));
                break;
            }

            self.run_queue.pop_front();
            let failed = exec.state == ExecutionState::Failed;
            let batch = exec.batch;
            let summary = summarize(exec);
            self.output.extend(summary);

            if failed {
                self.discard_batch(batch);
            }
            self.history.push_front(id);
        }
    }

    /// Enforce the history bound, releasing evicted executions.
    pub fn trim_history(&mut self) {
        let executions = &self.executions;
        let evicted = self
            .history
            .trim(|id| executions.get(&id).is_some_and(|e| e.is_pinned));
        for id in evicted {
            self.executions.remove(&id);
        }
    }

    /// Kill the running process, if any. Its exit still arrives as an event.
    pub fn interrupt(&mut self) {
        let process = self
            .current()
            .filter(|e| e.state.is_active())
            .and_then(|e| e.process);
        if let Some(process) = process {
            info!(%process, "interrupt: killing running process");
            self.backend.kill_process(process);
        }
    }

    /// Select the `n`-th history entry (1-based, 0 clears).
    ///
    /// Returns `false` when `n` is out of range.
    pub fn select_history(&mut self, n: usize) -> bool {
        self.history.select(n)
    }

    /// The selected execution, defaulting to the most recent one.
    pub fn selected(&self) -> Option<&Execution> {
        self.history
            .selected()
            .and_then(|id| self.executions.get(&id))
    }

    /// Flip the pin of an execution; returns the new value.
    pub fn toggle_pin(&mut self, id: ExecutionId) -> Option<bool> {
        let exec = self.executions.get_mut(&id)?;
        exec.is_pinned = !exec.is_pinned;
        Some(exec.is_pinned)
    }

    fn new_batch(&mut self) -> BatchId {
        let batch = self.next_batch;
        self.next_batch += 1;
        batch
    }

    fn push_execution(
        &mut self,
        task: TaskIndex,
        modifiers: RunModifiers,
        batch: BatchId,
        command_override: Option<String>,
        single_test: Option<String>,
    ) {
        let Some(t) = self.tasks.get(task) else {
            return;
        };

        let id = ExecutionId(self.next_execution);
        self.next_execution += 1;

        let gtest = (t.is_gtest && !modifiers.run_under_debugger)
            .then(|| GtestExecution::new(single_test.is_some()));
        let display_name = match &single_test {
            Some(test) => format!("{} [{}]", t.name, test),
            None => t.name.clone(),
        };
        let command = command_override.unwrap_or_else(|| t.command.clone());

        let exec = Execution::new(id, task, display_name, command, modifiers, batch, gtest);
        self.executions.insert(id, exec);
        self.run_queue.push_back(id);
    }

    fn execution_of(&self, process: ProcessId) -> Option<ExecutionId> {
        self.current()
            .filter(|e| e.process == Some(process) && e.state == ExecutionState::Running)
            .map(|e| e.id)
    }

    fn start_under_debugger(&mut self, id: ExecutionId) {
        let Some(exec) = self.executions.get_mut(&id) else {
            return;
        };

        let Some(command) = self.debugger.launch_command(&exec.shell_command) else {
            exec.state = ExecutionState::Failed;
            exec.message = Some(format!(
                "debugger is not configured (missing: {})",
                self.debugger.missing().join(", ")
            ));
            return;
        };

        match self.backend.spawn_detached(&command) {
            Ok(()) => {
                info!(execution = %id, cmd = %command, "handed execution to the debugger");
                exec.state = ExecutionState::Complete;
                exec.message = Some(DEBUGGER_STARTED.to_string());
            }
            Err(e) => {
                warn!(execution = %id, error = %e, "failed to start debugger");
                exec.state = ExecutionState::Failed;
                exec.message = Some(e.to_string());
            }
        }
    }

    fn append_output(&mut self, id: ExecutionId, stream: OutputStream, chunk: &str) {
        let Some(exec) = self.executions.get_mut(&id) else {
            return;
        };

        let added = exec.append_chunk(stream, chunk);
        if added == 0 {
            return;
        }

        let events = exec.parse_new_lines();
        echo(exec, added, events, &mut self.output);
    }

    fn settle(&mut self, id: ExecutionId, process: ProcessId) {
        let code = self.backend.take_exit_code(process);
        let Some(exec) = self.executions.get_mut(&id) else {
            return;
        };

        let added = exec.flush_carry();
        let events = exec.parse_new_lines();
        echo(exec, added, events, &mut self.output);

        let code = code.unwrap_or_else(|| {
            warn!(%process, "no exit code for exited process; treating as failure");
            -1
        });
        exec.exit_code = Some(code);
        exec.elapsed = exec.start_time.map(|t| t.elapsed());

        let parse_failure = exec.gtest.as_mut().and_then(|g| g.finish());
        let tests_failed = exec
            .gtest
            .as_ref()
            .is_some_and(|g| !g.failed_test_indices.is_empty());

        exec.state = if let Some(message) = parse_failure {
            exec.message = Some(message.to_string());
            ExecutionState::Failed
        } else if code == 0 && !tests_failed {
            ExecutionState::Complete
        } else {
            ExecutionState::Failed
        };

        info!(
            execution = %id,
            %process,
            exit_code = code,
            state = %exec.state,
            "execution settled"
        );
    }

    fn discard_batch(&mut self, batch: BatchId) {
        let executions = &self.executions;
        let (discarded, kept): (Vec<ExecutionId>, Vec<ExecutionId>) = self
            .run_queue
            .iter()
            .copied()
            .partition(|id| executions.get(id).is_some_and(|e| e.batch == batch));

        if discarded.is_empty() {
            return;
        }
        debug!(batch, discarded = discarded.len(), "discarding rest of failed batch");
        self.run_queue = kept.into();
        for id in discarded {
            self.executions.remove(&id);
        }
    }
}

/// Queue live output for the lines that just arrived.
fn echo(exec: &Execution, added: usize, events: Vec<GtestEvent>, output: &mut Vec<String>) {
    if !exec.modifiers.stream_output_live {
        return;
    }

    if exec.gtest.is_none() {
        let lines = exec.lines();
        output.extend(lines[lines.len() - added..].iter().cloned());
        return;
    }

    for event in events {
        match event {
            GtestEvent::TestStarted { index, name, total } if total > 0 => {
                output.push(format!("[{}/{}] {}", index + 1, total, name));
            }
            GtestEvent::TestStarted { index, name, .. } => {
                output.push(format!("[{}] {}", index + 1, name));
            }
            GtestEvent::TestOutput(line) => output.push(line),
            GtestEvent::TestFinished { .. } => {}
        }
    }
}

/// Lines describing the outcome of a settled execution.
fn summarize(exec: &Execution) -> Vec<String> {
    let mut lines = Vec::new();
    let name = &exec.display_name;

    match exec.state {
        ExecutionState::Complete => match (&exec.message, &exec.gtest) {
            (Some(message), _) => lines.push(format!("\"{name}\": {message}")),
            (None, Some(gtest)) => lines.push(format!(
                "\"{name}\": {} tests passed in {}",
                gtest.tests.len(),
                gtest.total_duration
            )),
            (None, None) => lines.push(format!(
                "\"{name}\" complete in {:.2}s",
                exec.elapsed.map(|d| d.as_secs_f64()).unwrap_or_default()
            )),
        },
        ExecutionState::Failed => {
            match (&exec.message, exec.exit_code) {
                (Some(message), _) => lines.push(format!("\"{name}\" failed: {message}")),
                (None, Some(code)) => lines.push(format!("\"{name}\" failed (exit code {code})")),
                (None, None) => lines.push(format!("\"{name}\" failed")),
            }

            if let Some(gtest) = &exec.gtest {
                match gtest.failed_test_indices.as_slice() {
                    [] => {}
                    [only] => {
                        if let Some(test) = gtest.tests.get(*only) {
                            lines.push(format!("\"{}\" failed:", test.name));
                            lines.extend(exec.test_output(*only).iter().cloned());
                        }
                    }
                    failed => {
                        lines.push(format!("{} tests failed:", failed.len()));
                        for (n, test) in gtest.failed_tests().enumerate() {
                            lines.push(format!("  {}. {}", n + 1, test.name));
                        }
                    }
                }
            }
        }
        ExecutionState::Queued | ExecutionState::Starting | ExecutionState::Running => {}
    }

    lines
}
