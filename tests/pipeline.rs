// tests/pipeline.rs

use std::error::Error;

use taskdeck::config::ConfigFile;
use taskdeck::exec::{event_queue, EventReceiver};
use taskdeck::gtest::FINISHED_PREMATURELY;
use taskdeck::pipeline::{ExecutionId, Pipeline, DEBUGGER_STARTED};
use taskdeck::types::{ExecutionState, RunModifiers};
use taskdeck_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use taskdeck_test_utils::fake_backend::{FakeProcessBackend, FakeRun};
use taskdeck_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

/// Drive the pipeline the way the engine does until the run queue is empty.
fn run_until_idle(p: &mut Pipeline, rx: &mut EventReceiver) {
    for _ in 0..10_000 {
        p.finish_settled_executions();
        p.trim_history();
        if p.current().is_none() {
            return;
        }
        p.start_next();
        while let Ok(event) = rx.try_recv() {
            p.handle_event(event);
        }
    }
    panic!("pipeline did not drain");
}

fn pipeline_with(
    cfg: &ConfigFile,
    backend: impl FnOnce(FakeProcessBackend) -> FakeProcessBackend,
) -> (Pipeline, EventReceiver, FakeProcessBackendHandles) {
    let (tx, rx) = event_queue();
    let backend = backend(FakeProcessBackend::new(tx));
    let handles = FakeProcessBackendHandles {
        started: backend.started(),
        detached: backend.detached(),
    };
    (Pipeline::new(cfg, Box::new(backend)), rx, handles)
}

struct FakeProcessBackendHandles {
    started: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    detached: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl FakeProcessBackendHandles {
    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    fn detached(&self) -> Vec<String> {
        self.detached.lock().unwrap().clone()
    }
}

#[test]
fn failed_first_entry_discards_rest_of_batch() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("one", "cmd-one").build())
        .with_task(TaskConfigBuilder::new("two", "cmd-two").build())
        .with_task(
            TaskConfigBuilder::new("three", "cmd-three")
                .pre_task("one")
                .pre_task("two")
                .build(),
        )
        .build();
    let (mut p, mut rx, fake) = pipeline_with(&cfg, |b| b.script("cmd-one", FakeRun::exit(1)));

    p.enqueue_task(2, RunModifiers::default())?;
    assert_eq!(p.run_queue_len(), 3);
    run_until_idle(&mut p, &mut rx);

    assert_eq!(fake.started(), vec!["cmd-one"]);
    assert_eq!(p.run_queue_len(), 0);
    let history: Vec<_> = p.history_entries().collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].display_name, "one");
    assert_eq!(history[0].state, ExecutionState::Failed);
    assert_eq!(history[0].exit_code, Some(1));
    Ok(())
}

#[test]
fn dependent_never_starts_after_pre_task_failure() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("A", "run-a").pre_task("B").build())
        .with_task(TaskConfigBuilder::new("B", "run-b").build())
        .build();
    let (mut p, mut rx, fake) = pipeline_with(&cfg, |b| {
        b.script("run-b", FakeRun::exit(2).stderr("boom\n"))
    });

    p.enqueue_task(0, RunModifiers::default())?;
    run_until_idle(&mut p, &mut rx);

    assert_eq!(fake.started(), vec!["run-b"]);
    let history: Vec<_> = p.history_entries().collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].display_name, "B");
    assert_eq!(history[0].state, ExecutionState::Failed);
    assert_eq!(history[0].lines(), &["boom".to_string()]);
    assert_eq!(p.run_queue_len(), 0);

    let output = p.take_output();
    assert!(output.iter().any(|l| l == "\"B\" failed (exit code 2)"), "{output:?}");
    Ok(())
}

#[test]
fn successful_batch_runs_in_order() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("configure", "c").build())
        .with_task(TaskConfigBuilder::new("build", "b").pre_task("configure").build())
        .with_task(TaskConfigBuilder::new("test", "t").pre_task("build").build())
        .build();
    let (mut p, mut rx, fake) = pipeline_with(&cfg, |b| b);

    p.enqueue_task(2, RunModifiers::default())?;
    run_until_idle(&mut p, &mut rx);

    assert_eq!(fake.started(), vec!["c", "b", "t"]);
    let names: Vec<&str> = p.history_entries().map(|e| e.display_name.as_str()).collect();
    assert_eq!(names, vec!["test", "build", "configure"]);
    assert!(p
        .history_entries()
        .all(|e| e.state == ExecutionState::Complete));
    Ok(())
}

#[test]
fn unknown_task_index_is_rejected() {
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("only", "x").build())
        .build();
    let (mut p, _rx, _fake) = pipeline_with(&cfg, |b| b);

    assert!(p.enqueue_task(7, RunModifiers::default()).is_err());
    assert_eq!(p.run_queue_len(), 0);
}

#[test]
fn repeat_until_fail_stops_on_first_failure() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("flaky", "./flaky").build())
        .build();
    let (mut p, mut rx, fake) = pipeline_with(&cfg, |b| {
        b.script("./flaky", FakeRun::exit(0).stdout("pass\n"))
            .script("./flaky", FakeRun::exit(0).stdout("pass\n"))
            .script("./flaky", FakeRun::exit(1).stdout("fail\n"))
    });

    p.enqueue_task(0, RunModifiers::repeat_until_fail())?;
    run_until_idle(&mut p, &mut rx);

    assert_eq!(fake.started().len(), 3);
    let history: Vec<_> = p.history_entries().collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, ExecutionState::Failed);
    assert_eq!(history[0].attempt, 3);
    // Fresh buffers for every attempt.
    assert_eq!(history[0].lines(), &["fail".to_string()]);
    Ok(())
}

#[test]
fn history_keeps_pinned_and_selected_entries() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .history_limit(100)
        .with_task(TaskConfigBuilder::new("quick", "true").build())
        .build();
    let (mut p, mut rx, _fake) = pipeline_with(&cfg, |b| b);

    // Oldest: pinned.
    p.enqueue_task(0, RunModifiers::default())?;
    run_until_idle(&mut p, &mut rx);
    let pinned = p.history_entries().next().unwrap().id;
    assert_eq!(p.toggle_pin(pinned), Some(true));

    // Second oldest: selected.
    p.enqueue_task(0, RunModifiers::default())?;
    run_until_idle(&mut p, &mut rx);
    assert!(p.select_history(1));
    let selected = p.selected().unwrap().id;

    for _ in 0..108 {
        p.enqueue_task(0, RunModifiers::default())?;
        run_until_idle(&mut p, &mut rx);
    }

    assert_eq!(p.history().len(), 100);
    assert!(p.history().contains(pinned));
    assert!(p.history().contains(selected));
    for evicted in 3..=12 {
        assert!(!p.history().contains(ExecutionId(evicted)), "e{evicted} kept");
        assert!(p.execution(ExecutionId(evicted)).is_none());
    }
    assert!(p.history().contains(ExecutionId(13)));
    assert_eq!(p.selected().map(|e| e.id), Some(selected));
    Ok(())
}

#[test]
fn selection_out_of_range_is_refused() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("quick", "true").build())
        .build();
    let (mut p, mut rx, _fake) = pipeline_with(&cfg, |b| b);
    p.enqueue_task(0, RunModifiers::default())?;
    run_until_idle(&mut p, &mut rx);

    assert!(!p.select_history(2));
    assert_eq!(p.history().explicit_selection(), None);
    assert!(p.select_history(1));
    assert!(p.select_history(0));
    assert_eq!(p.history().explicit_selection(), None);
    Ok(())
}

#[test]
fn partial_lines_are_joined_and_flushed_on_exit() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("chatty", "chatty").build())
        .build();
    let (mut p, mut rx, _fake) = pipeline_with(&cfg, |b| {
        b.script(
            "chatty",
            FakeRun::exit(0).stdout("hel").stdout("lo\r\nwor").stdout("ld"),
        )
    });

    p.enqueue_task(0, RunModifiers::live())?;
    run_until_idle(&mut p, &mut rx);

    let exec = p.history_entries().next().unwrap();
    assert_eq!(exec.lines(), &["hello".to_string(), "world".to_string()]);
    let output = p.take_output();
    assert!(output.contains(&"hello".to_string()));
    assert!(output.contains(&"world".to_string()));
    assert!(output.iter().any(|l| l.starts_with("\"chatty\" complete in ")));
    Ok(())
}

#[test]
fn spawn_failure_settles_as_failed() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("broken", "broken").build())
        .with_task(TaskConfigBuilder::new("after", "after").pre_task("broken").build())
        .build();
    let (mut p, mut rx, fake) = pipeline_with(&cfg, |b| b.unstartable("broken"));

    p.enqueue_task(1, RunModifiers::default())?;
    run_until_idle(&mut p, &mut rx);

    assert_eq!(fake.started(), vec!["broken"]);
    let exec = p.history_entries().next().unwrap();
    assert_eq!(exec.state, ExecutionState::Failed);
    assert!(exec.message.as_deref().unwrap_or_default().contains("cannot start"));
    assert_eq!(p.history().len(), 1);
    Ok(())
}

#[test]
fn debugger_runs_are_handed_off() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .debug_command("gdb --args {shell_command}")
        .terminal_command("xterm -e {command}")
        .with_task(TaskConfigBuilder::new("app", "./app --flag").build())
        .build();
    let (mut p, mut rx, fake) = pipeline_with(&cfg, |b| b);
    assert!(p.missing_debugger_settings().is_empty());

    p.enqueue_task(0, RunModifiers::debugger())?;
    run_until_idle(&mut p, &mut rx);

    assert!(fake.started().is_empty());
    assert_eq!(fake.detached(), vec!["xterm -e gdb --args ./app --flag"]);
    let exec = p.history_entries().next().unwrap();
    assert_eq!(exec.state, ExecutionState::Complete);
    assert_eq!(exec.message.as_deref(), Some(DEBUGGER_STARTED));
    Ok(())
}

#[test]
fn debugger_without_settings_fails() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("app", "./app").build())
        .build();
    let (mut p, mut rx, fake) = pipeline_with(&cfg, |b| b);
    assert_eq!(
        p.missing_debugger_settings(),
        vec!["debug_command", "terminal_command"]
    );

    p.enqueue_task(0, RunModifiers::debugger())?;
    run_until_idle(&mut p, &mut rx);

    assert!(fake.detached().is_empty());
    let exec = p.history_entries().next().unwrap();
    assert_eq!(exec.state, ExecutionState::Failed);
    Ok(())
}

const FAILING_SUITE: &str = "\
[==========] Running 3 tests from 1 test suite.
[ RUN      ] Net.Connects
[       OK ] Net.Connects (1 ms)
[ RUN      ] Net.Times
net_test.cc:40: Failure
timeout
[  FAILED  ] Net.Times (100 ms)
[ RUN      ] Net.Closes
[       OK ] Net.Closes (0 ms)
[==========] 3 tests from 1 test suite ran. (101 ms total)
";

#[test]
fn failing_test_binary_reports_the_failed_test() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::gtest("net", "./net_tests").build())
        .build();
    let (mut p, mut rx, fake) = pipeline_with(&cfg, |b| {
        b.script("./net_tests", FakeRun::exit(1).stdout(FAILING_SUITE))
    });

    p.enqueue_task(0, RunModifiers::live())?;
    run_until_idle(&mut p, &mut rx);

    assert_eq!(fake.started(), vec!["./net_tests"]);
    let exec = p.history_entries().next().unwrap();
    assert_eq!(exec.state, ExecutionState::Failed);
    let gtest = exec.gtest.as_ref().unwrap();
    assert_eq!(gtest.failed_test_indices, vec![1]);

    let output = p.take_output();
    assert!(output.contains(&"[1/3] Net.Connects".to_string()), "{output:?}");
    assert!(output.contains(&"\"Net.Times\" failed:".to_string()), "{output:?}");
    assert!(output.contains(&"timeout".to_string()), "{output:?}");
    Ok(())
}

#[test]
fn test_binary_exiting_early_is_failed_prematurely() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::gtest("net", "./net_tests").build())
        .build();
    let truncated: String = FAILING_SUITE.lines().take(2).map(|l| format!("{l}\n")).collect();
    let (mut p, mut rx, _fake) = pipeline_with(&cfg, |b| {
        b.script("./net_tests", FakeRun::exit(0).stdout(&truncated))
    });

    p.enqueue_task(0, RunModifiers::default())?;
    run_until_idle(&mut p, &mut rx);

    let exec = p.history_entries().next().unwrap();
    assert_eq!(exec.state, ExecutionState::Failed);
    assert_eq!(exec.message.as_deref(), Some(FINISHED_PREMATURELY));
    assert_eq!(exec.gtest.as_ref().unwrap().failed_test_indices, vec![0]);
    Ok(())
}

#[test]
fn single_test_rerun_uses_gtest_filter() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::gtest("net", "./net_tests").build())
        .build();
    let (mut p, mut rx, fake) = pipeline_with(&cfg, |b| {
        b.script("./net_tests", FakeRun::exit(1).stdout(FAILING_SUITE))
    });
    p.enqueue_task(0, RunModifiers::default())?;
    run_until_idle(&mut p, &mut rx);
    let source = p.history_entries().next().unwrap().id;

    assert!(p.enqueue_test_rerun(source, 1, false).is_some());
    run_until_idle(&mut p, &mut rx);

    assert_eq!(
        fake.started(),
        vec!["./net_tests", "./net_tests --gtest_filter=Net.Times"]
    );
    let rerun = p.history_entries().next().unwrap();
    assert_eq!(rerun.display_name, "net [Net.Times]");
    assert!(rerun.gtest.as_ref().unwrap().is_single_test_rerun);
    assert!(p.enqueue_test_rerun(source, 9, false).is_none());
    Ok(())
}
