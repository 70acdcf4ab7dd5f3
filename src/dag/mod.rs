// src/dag/mod.rs

//! Task list and pre-task resolution.
//!
//! - [`resolver`] flattens the declared pre-tasks of every task into a
//!   duplicate-free execution order and reports unknown names and cycles.
//! - [`TaskList`] is the immutable, index-addressed view of the configured
//!   tasks that the pipeline runs from.

pub mod resolver;

pub use resolver::{resolve, Resolution};

use crate::config::model::ConfigFile;

/// Command prefix marking a task as a GoogleTest binary.
pub const GTEST_PREFIX: &str = "__gtest ";

/// Position of a task in the configured task list.
pub type TaskIndex = usize;

/// A configured task, ready to be run.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    /// Shell command with any `__gtest ` marker stripped.
    pub command: String,
    /// Whether the command is a test binary whose output is parsed.
    pub is_gtest: bool,
    /// All transitive pre-tasks in execution order.
    pub pre_tasks: Vec<TaskIndex>,
}

/// Immutable list of tasks built once from a validated config.
#[derive(Debug, Clone, Default)]
pub struct TaskList {
    tasks: Vec<Task>,
}

impl TaskList {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let tasks = cfg
            .task
            .iter()
            .enumerate()
            .map(|(i, tc)| {
                let (command, is_gtest) = match tc.command.strip_prefix(GTEST_PREFIX) {
                    Some(rest) => (rest.trim_start().to_string(), true),
                    None => (tc.command.clone(), false),
                };
                Task {
                    name: tc.name.clone(),
                    command,
                    is_gtest,
                    pre_tasks: cfg.resolved_pre_tasks(i).to_vec(),
                }
            })
            .collect();

        Self { tasks }
    }

    pub fn get(&self, index: TaskIndex) -> Option<&Task> {
        self.tasks.get(index)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}
