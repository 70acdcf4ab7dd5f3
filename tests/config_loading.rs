// tests/config_loading.rs

use std::error::Error;
use std::fs;

use taskdeck::config::{load_and_validate, ConfigFile};
use taskdeck::errors::TaskdeckError;
use taskdeck_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use taskdeck_test_utils::init_tracing;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("Taskdeck.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn loads_tasks_and_resolves_pre_tasks() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        r#"
[config]
history_limit = 20
debug_command = "gdb --args {shell_command}"

[[task]]
name = "configure"
command = "cmake -B build"

[[task]]
name = "build"
command = "cmake --build build"
pre_tasks = ["configure"]

[[task]]
name = "unit"
command = "__gtest build/unit"
pre_tasks = ["build"]
"#,
    );

    let cfg = load_and_validate(&path)?;

    assert_eq!(cfg.config.history_limit, 20);
    assert_eq!(
        cfg.config.debug_command.as_deref(),
        Some("gdb --args {shell_command}")
    );
    assert_eq!(cfg.config.terminal_command, None);
    assert_eq!(cfg.task.len(), 3);
    assert_eq!(cfg.resolved_pre_tasks(0), &[] as &[usize]);
    assert_eq!(cfg.resolved_pre_tasks(1), &[0]);
    assert_eq!(cfg.resolved_pre_tasks(2), &[0, 1]);
    assert_eq!(cfg.task_index("unit"), Some(2));
    Ok(())
}

#[test]
fn defaults_apply_without_config_section() -> TestResult {
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        r#"
[[task]]
name = "hello"
command = "echo hello"
"#,
    );

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.config.history_limit, 100);
    assert!(cfg.task[0].pre_tasks.is_empty());
    Ok(())
}

#[test]
fn reports_every_problem_at_once() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        r#"
[config]
history_limit = 0

[[task]]
name = "a"
command = "true"
pre_tasks = ["missing"]

[[task]]
name = "a"
command = ""
"#,
    );

    let err = load_and_validate(&path).unwrap_err();
    let TaskdeckError::InvalidConfig(errors) = err else {
        panic!("expected InvalidConfig, got {err:?}");
    };

    assert!(errors.iter().any(|e| e.contains("history_limit")), "{errors:?}");
    assert!(errors.iter().any(|e| e.contains("defined more than once")), "{errors:?}");
    assert!(errors.iter().any(|e| e.contains("empty command")), "{errors:?}");
    assert!(
        errors
            .iter()
            .any(|e| e.contains("references task 'missing' that does not exist")),
        "{errors:?}"
    );
    Ok(())
}

#[test]
fn cycle_is_a_config_error() {
    let raw = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("x", "true").pre_task("y").build())
        .with_task(TaskConfigBuilder::new("y", "true").pre_task("x").build())
        .raw();

    let err = ConfigFile::try_from(raw).unwrap_err();
    assert!(matches!(err, TaskdeckError::InvalidConfig(ref e) if e.len() == 1));
    assert!(err.to_string().contains("circular dependency"));
}

#[test]
fn empty_config_is_rejected() -> TestResult {
    let dir = TempDir::new()?;
    let path = write_config(&dir, "[config]\nhistory_limit = 5\n");

    let err = load_and_validate(&path).unwrap_err();
    assert!(err.to_string().contains("at least one [[task]]"));
    Ok(())
}

#[test]
fn malformed_toml_is_a_toml_error() -> TestResult {
    let dir = TempDir::new()?;
    let path = write_config(&dir, "[[task]\nname = ");

    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, TaskdeckError::TomlError(_)), "{err:?}");
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() -> TestResult {
    let dir = TempDir::new()?;
    let err = load_and_validate(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, TaskdeckError::IoError(_)), "{err:?}");
    Ok(())
}
