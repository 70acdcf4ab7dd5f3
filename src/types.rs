// src/types.rs

use std::fmt;
use std::str::FromStr;

/// Lifecycle of one execution.
///
/// `Queued -> Starting -> Running -> {Complete | Failed}`. Executions that
/// never need a tracked process (debugger hand-off, spawn failure) go from
/// `Starting` straight to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Queued,
    Starting,
    Running,
    Complete,
    Failed,
}

impl ExecutionState {
    /// Whether the execution has reached `Complete` or `Failed`.
    pub fn is_settled(self) -> bool {
        matches!(self, ExecutionState::Complete | ExecutionState::Failed)
    }

    /// Whether an OS process is (about to be) running for the execution.
    pub fn is_active(self) -> bool {
        matches!(self, ExecutionState::Starting | ExecutionState::Running)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionState::Queued => "queued",
            ExecutionState::Starting => "starting",
            ExecutionState::Running => "running",
            ExecutionState::Complete => "complete",
            ExecutionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Modifiers a user can attach to a run request.
///
/// Only the final entry of a run batch (the requested task itself) carries
/// them; its pre-tasks run plain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunModifiers {
    /// Echo output lines as they arrive.
    pub stream_output_live: bool,
    /// Start the execution again each time it completes, until it fails.
    pub repeat_until_fail: bool,
    /// Hand the command to the configured debugger instead of running it.
    pub run_under_debugger: bool,
}

impl RunModifiers {
    pub fn live() -> Self {
        Self {
            stream_output_live: true,
            ..Self::default()
        }
    }

    pub fn repeat_until_fail() -> Self {
        Self {
            repeat_until_fail: true,
            ..Self::default()
        }
    }

    pub fn debugger() -> Self {
        Self {
            run_under_debugger: true,
            ..Self::default()
        }
    }
}

/// How a task run was requested at the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// `t`: run once, streaming output.
    Once,
    /// `tr`: repeat until the run fails.
    RepeatUntilFail,
    /// `td`: run under the debugger.
    Debugger,
}

impl RunMode {
    pub fn modifiers(self) -> RunModifiers {
        match self {
            RunMode::Once => RunModifiers::live(),
            RunMode::RepeatUntilFail => RunModifiers::repeat_until_fail(),
            RunMode::Debugger => RunModifiers::debugger(),
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "t" => Ok(RunMode::Once),
            "tr" => Ok(RunMode::RepeatUntilFail),
            "td" => Ok(RunMode::Debugger),
            other => Err(format!(
                "invalid run mode: {other} (expected \"t\", \"tr\" or \"td\")"
            )),
        }
    }
}
