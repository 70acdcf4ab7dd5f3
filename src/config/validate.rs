// src/config/validate.rs

use std::collections::HashSet;

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::resolver::resolve;
use crate::errors::TaskdeckError;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TaskdeckError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let mut errors = Vec::new();

        check_global_config(&raw, &mut errors);
        check_tasks(&raw, &mut errors);

        let resolution = resolve(&raw.task);
        errors.extend(resolution.errors);

        if !errors.is_empty() {
            return Err(TaskdeckError::InvalidConfig(errors));
        }

        debug!(tasks = raw.task.len(), "config validated");
        Ok(ConfigFile::new_unchecked(
            raw.config,
            raw.task,
            resolution.pre_tasks,
        ))
    }
}

fn check_global_config(cfg: &RawConfigFile, errors: &mut Vec<String>) {
    if cfg.config.history_limit == 0 {
        errors.push("[config].history_limit must be >= 1 (got 0)".to_string());
    }
}

fn check_tasks(cfg: &RawConfigFile, errors: &mut Vec<String>) {
    if cfg.task.is_empty() {
        errors.push("config must contain at least one [[task]] entry".to_string());
        return;
    }

    let mut seen = HashSet::new();
    for (i, task) in cfg.task.iter().enumerate() {
        if task.name.trim().is_empty() {
            errors.push(format!("task #{} has an empty name", i + 1));
        } else if !seen.insert(task.name.as_str()) {
            errors.push(format!("task '{}' is defined more than once", task.name));
        }

        if task.command.trim().is_empty() {
            errors.push(format!("task '{}' has an empty command", task.name));
        }
    }
}
