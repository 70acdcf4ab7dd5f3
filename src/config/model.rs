// src/config/model.rs

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// history_limit = 100
/// debug_command = "gdb -ex run --args {shell_command}"
/// terminal_command = "xterm -e {command}"
///
/// [[task]]
/// name = "build"
/// command = "cmake --build build"
///
/// [[task]]
/// name = "unit tests"
/// command = "__gtest build/unit_tests"
/// pre_tasks = ["build"]
/// ```
///
/// This is the unvalidated form; the rest of the crate works with
/// [`ConfigFile`], which can only be obtained through validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Global settings from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// All tasks from `[[task]]`, in declaration order.
    ///
    /// A task is identified by its position in this list.
    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// How many finished executions are kept in history.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Debugger invocation template; `{shell_command}` is replaced by the
    /// command being debugged.
    #[serde(default)]
    pub debug_command: Option<String>,

    /// Template used to open a separate terminal; `{command}` is replaced by
    /// the command to run in it.
    #[serde(default)]
    pub terminal_command: Option<String>,
}

fn default_history_limit() -> usize {
    100
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            debug_command: None,
            terminal_command: None,
        }
    }
}

/// `[[task]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Display name, also used to reference the task from `pre_tasks`.
    pub name: String,

    /// Shell command to execute. A `__gtest ` prefix marks a test binary.
    pub command: String,

    /// Names of tasks that must complete successfully before this one runs.
    #[serde(default)]
    pub pre_tasks: Vec<String>,
}

/// Validated configuration.
///
/// Besides the raw sections it carries the resolved pre-task order of every
/// task, computed once at load time.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub task: Vec<TaskConfig>,
    resolved_pre_tasks: Vec<Vec<usize>>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        task: Vec<TaskConfig>,
        resolved_pre_tasks: Vec<Vec<usize>>,
    ) -> Self {
        Self {
            config,
            task,
            resolved_pre_tasks,
        }
    }

    /// All transitive pre-tasks of `task`, in execution order.
    pub fn resolved_pre_tasks(&self, task: usize) -> &[usize] {
        self.resolved_pre_tasks
            .get(task)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Position of the task called `name`, if any.
    pub fn task_index(&self, name: &str) -> Option<usize> {
        self.task.iter().position(|t| t.name == name)
    }
}
