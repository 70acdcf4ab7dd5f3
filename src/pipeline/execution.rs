// src/pipeline/execution.rs

//! One concrete run of a task.

use std::fmt;
use std::time::{Duration, Instant};

use crate::dag::TaskIndex;
use crate::exec::ProcessId;
use crate::gtest::{GtestEvent, GtestExecution};
use crate::types::{ExecutionState, RunModifiers};

/// Identifier of an execution, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(pub u64);

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Identifier shared by all executions created by one run request.
pub type BatchId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A queued, running or finished run of one task.
///
/// The same entity lives from the moment it is queued until it is evicted
/// from history.
#[derive(Debug)]
pub struct Execution {
    pub id: ExecutionId,
    pub task: TaskIndex,
    pub display_name: String,
    pub shell_command: String,
    pub state: ExecutionState,
    pub modifiers: RunModifiers,
    pub batch: BatchId,
    pub is_pinned: bool,
    pub start_time: Option<Instant>,
    pub elapsed: Option<Duration>,
    pub process: Option<ProcessId>,
    pub exit_code: Option<i32>,
    /// Explanation shown next to the outcome (debugger hand-off, truncated
    /// test output, spawn error).
    pub message: Option<String>,
    pub gtest: Option<GtestExecution>,
    /// 1 for the first run; bumped by repeat-until-fail.
    pub attempt: u32,
    stdout_carry: String,
    stderr_carry: String,
    lines: Vec<String>,
}

impl Execution {
    pub(crate) fn new(
        id: ExecutionId,
        task: TaskIndex,
        display_name: String,
        shell_command: String,
        modifiers: RunModifiers,
        batch: BatchId,
        gtest: Option<GtestExecution>,
    ) -> Self {
        Self {
            id,
            task,
            display_name,
            shell_command,
            state: ExecutionState::Queued,
            modifiers,
            batch,
            is_pinned: false,
            start_time: None,
            elapsed: None,
            process: None,
            exit_code: None,
            message: None,
            gtest,
            attempt: 1,
            stdout_carry: String::new(),
            stderr_carry: String::new(),
            lines: Vec::new(),
        }
    }

    /// Completed output lines of both streams, in arrival order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Captured output of test `index`, if this is a test run.
    pub fn test_output(&self, index: usize) -> &[String] {
        match &self.gtest {
            Some(gtest) => gtest.test_output(index, &self.lines),
            None => &[],
        }
    }

    /// Append a raw chunk; returns the number of completed lines it added.
    ///
    /// A trailing partial line stays in the stream's carry buffer until a
    /// later chunk completes it.
    pub(crate) fn append_chunk(&mut self, stream: OutputStream, chunk: &str) -> usize {
        let carry = match stream {
            OutputStream::Stdout => &mut self.stdout_carry,
            OutputStream::Stderr => &mut self.stderr_carry,
        };
        carry.push_str(chunk);

        let mut added = 0;
        while let Some(pos) = carry.find('\n') {
            let rest = carry.split_off(pos + 1);
            let mut line = std::mem::replace(carry, rest);
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            self.lines.push(line);
            added += 1;
        }
        added
    }

    /// Turn unterminated carry contents into final lines.
    pub(crate) fn flush_carry(&mut self) -> usize {
        let mut added = 0;
        for carry in [&mut self.stdout_carry, &mut self.stderr_carry] {
            if !carry.is_empty() {
                self.lines.push(std::mem::take(carry));
                added += 1;
            }
        }
        added
    }

    /// Feed lines not seen yet to the test parser, if this is a test run.
    pub(crate) fn parse_new_lines(&mut self) -> Vec<GtestEvent> {
        match self.gtest.as_mut() {
            Some(gtest) => gtest.consume(&self.lines),
            None => Vec::new(),
        }
    }

    /// Prepare a completed execution to run again with fresh buffers.
    pub(crate) fn reset_for_repeat(&mut self) {
        self.state = ExecutionState::Queued;
        self.start_time = None;
        self.elapsed = None;
        self.process = None;
        self.exit_code = None;
        self.message = None;
        self.attempt += 1;
        self.stdout_carry.clear();
        self.stderr_carry.clear();
        self.lines.clear();
        if let Some(gtest) = self.gtest.as_mut() {
            *gtest = GtestExecution::new(gtest.is_single_test_rerun);
        }
    }
}
