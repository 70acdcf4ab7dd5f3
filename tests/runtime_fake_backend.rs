// tests/runtime_fake_backend.rs

use std::error::Error;

use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use taskdeck::config::ConfigFile;
use taskdeck::engine::{CoreRuntime, Runtime, RuntimeOptions};
use taskdeck::exec::event_queue;
use taskdeck::pipeline::Pipeline;
use taskdeck::types::RunModifiers;
use taskdeck_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use taskdeck_test_utils::fake_backend::{FakeProcessBackend, FakeRun};
use taskdeck_test_utils::{init_tracing, SharedOutput};

type TestResult = Result<(), Box<dyn Error>>;

/// Very simple chain: lint -> check
fn simple_chain_config() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("lint", "run-lint").build())
        .with_task(TaskConfigBuilder::new("check", "run-check").pre_task("lint").build())
        .build()
}

#[tokio::test]
async fn interactive_session_runs_and_quits() -> TestResult {
    init_tracing();
    let cfg = simple_chain_config();
    let (tx, rx) = event_queue();
    let backend = FakeProcessBackend::new(tx)
        .script("run-lint", FakeRun::exit(0).stdout("lint ok\n"))
        .script("run-check", FakeRun::exit(0).stdout("check ok\n"));
    let started = backend.started();

    let core = CoreRuntime::new(Pipeline::new(&cfg, Box::new(backend)), RuntimeOptions::default());
    let (_interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
    let output = SharedOutput::new();
    let input = BufReader::new(b"t 2\nh\nq\nt 1\n".as_slice());

    let runtime = Runtime::new(core, rx, interrupt_rx, input, Box::new(output.clone()));
    let code = timeout(Duration::from_secs(5), runtime.run()).await??;

    assert_eq!(code, 0);
    // `t 1` after `q` is never read.
    assert_eq!(*started.lock().unwrap(), vec!["run-lint", "run-check"]);

    let text = output.contents();
    // Pre-tasks are not echoed live; only the requested task is.
    assert!(text.contains("Running \"lint\""), "{text}");
    assert!(text.contains("\"lint\" complete"), "{text}");
    assert!(!text.contains("lint ok"), "{text}");
    assert!(text.contains("check ok"), "{text}");
    assert!(text.contains("  1. check [complete]"), "{text}");
    assert!(text.contains("  2. lint [complete]"), "{text}");
    Ok(())
}

#[tokio::test]
async fn end_of_input_stops_the_runtime() -> TestResult {
    let cfg = simple_chain_config();
    let (tx, rx) = event_queue();
    let core = CoreRuntime::new(
        Pipeline::new(&cfg, Box::new(FakeProcessBackend::new(tx))),
        RuntimeOptions::default(),
    );
    let (_interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();

    let runtime = Runtime::new(
        core,
        rx,
        interrupt_rx,
        BufReader::new(b"t\n".as_slice()),
        Box::new(SharedOutput::new()),
    );
    let code = timeout(Duration::from_secs(5), runtime.run()).await??;

    assert_eq!(code, 0);
    Ok(())
}

#[tokio::test]
async fn single_task_mode_reports_failure() -> TestResult {
    init_tracing();
    let cfg = simple_chain_config();
    let (tx, rx) = event_queue();
    let backend = FakeProcessBackend::new(tx).script("run-lint", FakeRun::exit(3));
    let started = backend.started();

    let mut core = CoreRuntime::new(
        Pipeline::new(&cfg, Box::new(backend)),
        RuntimeOptions {
            exit_when_idle: true,
        },
    );
    core.run_task(1, RunModifiers::live());

    let (_interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
    let output = SharedOutput::new();
    let runtime = Runtime::new(
        core,
        rx,
        interrupt_rx,
        BufReader::new(b"".as_slice()),
        Box::new(output.clone()),
    );
    let code = timeout(Duration::from_secs(5), runtime.run()).await??;

    assert_eq!(code, 1);
    assert_eq!(*started.lock().unwrap(), vec!["run-lint"]);
    assert!(output.contents().contains("\"lint\" failed (exit code 3)"));
    Ok(())
}

#[tokio::test]
async fn ctrl_c_kills_the_running_process() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_task(TaskConfigBuilder::new("serve", "serve").build())
        .build();
    let (tx, rx) = event_queue();
    let backend = FakeProcessBackend::new(tx).hold("serve");

    let core = CoreRuntime::new(Pipeline::new(&cfg, Box::new(backend)), RuntimeOptions::default());
    let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
    let output = SharedOutput::new();
    let runtime = Runtime::new(
        core,
        rx,
        interrupt_rx,
        BufReader::new(b"t 1\n".as_slice()),
        Box::new(output.clone()),
    );

    // Arrives while `serve` is running; input then ends and the runtime stops.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = interrupt_tx.send(());
    });
    let code = timeout(Duration::from_secs(5), runtime.run()).await??;

    assert_eq!(code, 0);
    assert!(output.contents().contains("\"serve\" failed (exit code -1)"));
    Ok(())
}
