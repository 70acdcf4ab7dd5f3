// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! [`CoreRuntime`] owns the cooperative scheduler and the [`Session`] that
//! every scheduled process works on. It consumes user commands and process
//! events and produces lines of output; it has no channels, no Tokio types
//! and performs no IO itself (the pipeline's backend does the spawning).
//!
//! Every accepted command becomes a root process. Running tasks is done by a
//! single long-lived `drive` process: it starts the head of the run queue,
//! parks a child that waits for the execution to settle, and is woken by
//! that child once the process has exited.

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, info};

use crate::dag::TaskIndex;
use crate::engine::command::{UserCommand, HELP};
use crate::engine::RuntimeOptions;
use crate::exec::ProcessEvent;
use crate::pipeline::{Execution, ExecutionId, Pipeline};
use crate::scheduler::{NodeHandle, Scheduler, Step, Work};
use crate::types::{ExecutionState, RunModifiers};

/// State shared by all scheduled processes.
#[derive(Debug)]
pub struct Session {
    pub pipeline: Pipeline,
    output: Vec<String>,
    /// Processes suspended until an execution settles.
    watchers: HashMap<ExecutionId, NodeHandle>,
    /// The live `drive` process, if any.
    driver: Option<NodeHandle>,
    /// Tests listed by the last `g`, as (execution, test indices).
    displayed_tests: Option<(ExecutionId, Vec<usize>)>,
    quit: bool,
}

impl Session {
    fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            output: Vec::new(),
            watchers: HashMap::new(),
            driver: None,
            displayed_tests: None,
            quit: false,
        }
    }

    /// Queue a line of output after anything the pipeline has queued.
    fn say(&mut self, line: impl Into<String>) {
        self.collect_pipeline_output();
        self.output.push(line.into());
    }

    fn collect_pipeline_output(&mut self) {
        let lines = self.pipeline.take_output();
        self.output.extend(lines);
    }

    fn missing_debugger(&mut self) -> bool {
        let missing = self.pipeline.missing_debugger_settings();
        if missing.is_empty() {
            return false;
        }
        self.say(format!(
            "Debugger is not configured; set {} in [config]",
            missing.join(" and ")
        ));
        true
    }

    /// Map a number from the last `g` listing to (execution, test index).
    fn displayed_test(&self, n: usize) -> Result<(ExecutionId, usize), String> {
        let Some((id, tests)) = &self.displayed_tests else {
            return Err("No tests listed yet; use 'g' first".to_string());
        };
        let Some(&test) = n.checked_sub(1).and_then(|i| tests.get(i)) else {
            return Err(format!("No test {n} in the last listing"));
        };
        if self.pipeline.execution(*id).is_none() {
            return Err("The listed execution is no longer in history".to_string());
        }
        Ok((*id, test))
    }
}

fn process(
    work: impl FnOnce(&mut Scheduler<Session>, NodeHandle, &mut Session) -> Step<Session> + 'static,
) -> Work<Session> {
    Box::new(work)
}

/// Pure core runtime state.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler<Session>,
    session: Session,
    options: RuntimeOptions,
}

impl CoreRuntime {
    pub fn new(pipeline: Pipeline, options: RuntimeOptions) -> Self {
        Self {
            scheduler: Scheduler::new(),
            session: Session::new(pipeline),
            options,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.session.pipeline
    }

    /// Parse and run one line of prompt input. Blank lines are ignored.
    pub fn submit_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match line.parse::<UserCommand>() {
            Ok(command) => self.submit(command),
            Err(message) => self.session.say(message),
        }
    }

    /// Schedule `command` as a root process and run until quiescent.
    pub fn submit(&mut self, command: UserCommand) {
        debug!(?command, "submitting command");
        let work = match command {
            UserCommand::ListTasks => process(|_, _, s| {
                list_tasks(s);
                Step::Done
            }),
            UserCommand::RunTask { index, mode } => process(move |sched, me, s| {
                let Some(task) = index.checked_sub(1).filter(|&t| t < s.pipeline.tasks().len())
                else {
                    s.say(format!("No task {index}"));
                    return Step::Done;
                };
                let modifiers = mode.modifiers();
                if modifiers.run_under_debugger && s.missing_debugger() {
                    return Step::Done;
                }
                start_batch(sched, me, s, task, modifiers)
            }),
            UserCommand::ListHistory => process(|_, _, s| {
                list_history(s);
                Step::Done
            }),
            UserCommand::SelectHistory(n) => process(move |_, _, s| {
                select_history(s, n);
                Step::Done
            }),
            UserCommand::TogglePin => process(|_, _, s| {
                toggle_pin(s);
                Step::Done
            }),
            UserCommand::ShowOutput => process(|_, _, s| {
                show_output(s);
                Step::Done
            }),
            UserCommand::ListTests => process(|_, _, s| {
                list_tests(s);
                Step::Done
            }),
            UserCommand::ShowTest(n) => process(move |_, _, s| {
                show_test(s, n);
                Step::Done
            }),
            UserCommand::RerunTest {
                index,
                under_debugger,
            } => process(move |sched, me, s| rerun_test(sched, me, s, index, under_debugger)),
            UserCommand::SearchTest { index, pattern } => process(move |_, _, s| {
                search_test(s, index, &pattern);
                Step::Done
            }),
            UserCommand::Help => process(|_, _, s| {
                for line in HELP {
                    s.say(*line);
                }
                Step::Done
            }),
            UserCommand::Quit => process(|_, _, s| {
                s.quit = true;
                Step::Done
            }),
        };

        self.scheduler.schedule(work, None);
        self.tick();
    }

    /// Run `task` (with its pre-tasks) without going through the prompt.
    pub fn run_task(&mut self, task: TaskIndex, modifiers: RunModifiers) {
        self.scheduler.schedule(
            process(move |sched, me, s| start_batch(sched, me, s, task, modifiers)),
            None,
        );
        self.tick();
    }

    /// Feed one process event; wakes whoever waits for the execution if the
    /// event settled it.
    pub fn on_event(&mut self, event: ProcessEvent) {
        if let Some(id) = self.session.pipeline.handle_event(event) {
            match self.session.watchers.remove(&id) {
                Some(watcher) => self.scheduler.resume(watcher, None),
                None => debug!(execution = %id, "settled execution has no watcher"),
            }
        }
        self.tick();
    }

    /// Ctrl-C: kill the running process, or quit when nothing runs.
    pub fn interrupt(&mut self) {
        if self.has_active_process() {
            self.session.pipeline.interrupt();
        } else {
            info!("interrupt while idle; quitting");
            self.session.quit = true;
        }
    }

    pub fn has_active_process(&self) -> bool {
        self.session.pipeline.has_active_process()
    }

    /// Whether the shell should stop: the user quit, or (with
    /// `exit_when_idle`) all work is done.
    pub fn should_exit(&self) -> bool {
        self.session.quit || (self.options.exit_when_idle && self.scheduler.live_count() == 0)
    }

    /// Whether the most recent finished execution failed.
    pub fn last_execution_failed(&self) -> bool {
        self.session
            .pipeline
            .history_entries()
            .next()
            .is_some_and(|e| e.state == ExecutionState::Failed)
    }

    /// Process exit status for non-interactive runs.
    pub fn exit_code(&self) -> i32 {
        if self.options.exit_when_idle && self.last_execution_failed() {
            1
        } else {
            0
        }
    }

    /// Drain all queued output lines.
    pub fn take_output(&mut self) -> Vec<String> {
        self.session.collect_pipeline_output();
        std::mem::take(&mut self.session.output)
    }

    fn tick(&mut self) {
        self.scheduler.tick(&mut self.session);
    }
}

/// Queue a batch and make sure a `drive` process is working on the queue.
///
/// The calling process turns into the driver unless one is already live.
fn start_batch(
    sched: &mut Scheduler<Session>,
    me: NodeHandle,
    s: &mut Session,
    task: TaskIndex,
    modifiers: RunModifiers,
) -> Step<Session> {
    if let Err(e) = s.pipeline.enqueue_task(task, modifiers) {
        s.say(e.to_string());
        return Step::Done;
    }
    become_driver(sched, me, s)
}

fn become_driver(sched: &mut Scheduler<Session>, me: NodeHandle, s: &mut Session) -> Step<Session> {
    if s.driver.is_some_and(|d| sched.is_live(d)) {
        return Step::Done;
    }
    s.driver = Some(me);
    Step::Continue(Box::new(drive))
}

/// One round of the run loop.
fn drive(sched: &mut Scheduler<Session>, me: NodeHandle, s: &mut Session) -> Step<Session> {
    sched.reap_finished_children(me);
    s.pipeline.finish_settled_executions();
    s.pipeline.trim_history();

    let Some(current) = s.pipeline.current() else {
        debug!(node = %me, "run queue drained; driver done");
        s.driver = None;
        s.collect_pipeline_output();
        return Step::Done;
    };

    let (id, state) = (current.id, current.state);
    match state {
        ExecutionState::Queued => {
            s.pipeline.start_next();
        }
        ExecutionState::Running => {
            sched.schedule(
                process(move |_, watcher, s| {
                    s.watchers.insert(id, watcher);
                    Step::Suspend
                }),
                Some(me),
            );
        }
        // Settled ones are finalized on the next round.
        ExecutionState::Starting | ExecutionState::Complete | ExecutionState::Failed => {}
    }

    s.collect_pipeline_output();
    Step::Continue(Box::new(drive))
}

fn rerun_test(
    sched: &mut Scheduler<Session>,
    me: NodeHandle,
    s: &mut Session,
    n: usize,
    under_debugger: bool,
) -> Step<Session> {
    let (id, test) = match s.displayed_test(n) {
        Ok(found) => found,
        Err(message) => {
            s.say(message);
            return Step::Done;
        }
    };
    if under_debugger && s.missing_debugger() {
        return Step::Done;
    }
    match s.pipeline.enqueue_test_rerun(id, test, under_debugger) {
        Some(_) => become_driver(sched, me, s),
        None => {
            s.say(format!("Cannot re-run test {n}"));
            Step::Done
        }
    }
}

fn list_tasks(s: &mut Session) {
    let lines: Vec<String> = s
        .pipeline
        .tasks()
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let marker = if t.is_gtest { " (tests)" } else { "" };
            format!("{:>3}. {}{}", i + 1, t.name, marker)
        })
        .collect();
    for line in lines {
        s.say(line);
    }
}

fn history_line(n: usize, e: &Execution, selected: bool) -> String {
    let sel = if selected { '>' } else { ' ' };
    let pin = if e.is_pinned { '*' } else { ' ' };
    let mut line = format!("{sel}{pin}{n:>3}. {} [{}]", e.display_name, e.state);
    if let Some(message) = &e.message {
        line.push_str(&format!(" {message}"));
    }
    line
}

fn list_history(s: &mut Session) {
    if s.pipeline.history().is_empty() {
        s.say("History is empty");
        return;
    }
    let selected = s.pipeline.history().explicit_selection();
    let lines: Vec<String> = s
        .pipeline
        .history_entries()
        .enumerate()
        .map(|(i, e)| history_line(i + 1, e, Some(e.id) == selected))
        .collect();
    for line in lines {
        s.say(line);
    }
}

fn select_history(s: &mut Session, n: usize) {
    if !s.pipeline.select_history(n) {
        s.say(format!("No history entry {n}"));
        list_history(s);
        return;
    }
    if n == 0 {
        s.say("Selection cleared; showing the most recent execution");
        return;
    }
    if let Some(name) = s.pipeline.selected().map(|e| e.display_name.clone()) {
        s.say(format!("Selected \"{name}\""));
    }
}

fn toggle_pin(s: &mut Session) {
    let Some(id) = s.pipeline.selected().map(|e| e.id) else {
        s.say("History is empty");
        return;
    };
    match s.pipeline.toggle_pin(id) {
        Some(true) => s.say("Pinned"),
        Some(false) => s.say("Unpinned"),
        None => {}
    }
}

fn show_output(s: &mut Session) {
    let Some(exec) = s.pipeline.selected() else {
        s.say("History is empty");
        return;
    };
    let mut lines = vec![format!("Output of \"{}\":", exec.display_name)];
    lines.extend(exec.lines().iter().cloned());
    for line in lines {
        s.say(line);
    }
}

fn list_tests(s: &mut Session) {
    let Some(exec) = s.pipeline.selected() else {
        s.say("History is empty");
        return;
    };
    let Some(gtest) = &exec.gtest else {
        let message = format!("\"{}\" is not a test execution", exec.display_name);
        s.say(message);
        return;
    };

    let indices: Vec<usize> = if gtest.failed_test_indices.is_empty() {
        (0..gtest.tests.len()).collect()
    } else {
        gtest.failed_test_indices.clone()
    };
    let header = if gtest.failed_test_indices.is_empty() {
        format!("{} tests of \"{}\":", indices.len(), exec.display_name)
    } else {
        format!("{} failed tests of \"{}\":", indices.len(), exec.display_name)
    };
    let mut lines = vec![header];
    lines.extend(indices.iter().enumerate().filter_map(|(n, &i)| {
        gtest
            .tests
            .get(i)
            .map(|t| format!("{:>3}. {} ({})", n + 1, t.name, t.duration))
    }));

    s.displayed_tests = Some((exec.id, indices));
    for line in lines {
        s.say(line);
    }
}

/// Name and output of a listed test.
fn test_output(s: &Session, n: usize) -> Result<(String, Vec<String>), String> {
    let (id, test) = s.displayed_test(n)?;
    let exec = s
        .pipeline
        .execution(id)
        .ok_or_else(|| format!("No test {n}"))?;
    let name = exec
        .gtest
        .as_ref()
        .and_then(|g| g.tests.get(test))
        .map(|t| t.name.clone())
        .ok_or_else(|| format!("No test {n}"))?;
    Ok((name, exec.test_output(test).to_vec()))
}

fn show_test(s: &mut Session, n: usize) {
    match test_output(s, n) {
        Ok((name, output)) => {
            s.say(format!("Output of \"{name}\":"));
            for line in output {
                s.say(line);
            }
        }
        Err(message) => s.say(message),
    }
}

fn search_test(s: &mut Session, n: usize, pattern: &str) {
    let regex = match Regex::new(pattern) {
        Ok(r) => r,
        Err(e) => {
            s.say(format!("Invalid pattern: {e}"));
            return;
        }
    };
    let (name, output) = match test_output(s, n) {
        Ok(found) => found,
        Err(message) => {
            s.say(message);
            return;
        }
    };

    let matches: Vec<String> = output
        .iter()
        .enumerate()
        .filter(|(_, line)| regex.is_match(line))
        .map(|(i, line)| format!("{:>4}: {line}", i + 1))
        .collect();
    if matches.is_empty() {
        s.say(format!("No matches for /{pattern}/ in \"{name}\""));
        return;
    }
    s.say(format!("{} matches in \"{name}\":", matches.len()));
    for line in matches {
        s.say(line);
    }
}
