#![allow(dead_code)]

use taskdeck::config::{ConfigFile, ConfigSection, RawConfigFile, TaskConfig};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                task: Vec::new(),
            },
        }
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.config.task.push(task);
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.config.config.history_limit = limit;
        self
    }

    pub fn debug_command(mut self, template: &str) -> Self {
        self.config.config.debug_command = Some(template.to_string());
        self
    }

    pub fn terminal_command(mut self, template: &str) -> Self {
        self.config.config.terminal_command = Some(template.to_string());
        self
    }

    /// The unvalidated form, for validation tests.
    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            task: TaskConfig {
                name: name.to_string(),
                command: command.to_string(),
                pre_tasks: vec![],
            },
        }
    }

    /// A test binary (`__gtest ` command).
    pub fn gtest(name: &str, command: &str) -> Self {
        Self::new(name, &format!("__gtest {command}"))
    }

    pub fn pre_task(mut self, name: &str) -> Self {
        self.task.pre_tasks.push(name.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
