// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod gtest;
pub mod logging;
pub mod pipeline;
pub mod scheduler;
pub mod types;

use anyhow::Result;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::TaskList;
use crate::engine::{CoreRuntime, Runtime, RuntimeOptions};
use crate::errors::TaskdeckError;
use crate::exec::{event_queue, TokioProcessBackend};
use crate::pipeline::Pipeline;
use crate::types::RunModifiers;

/// High-level entry point used by `main.rs`. Returns the exit status.
///
/// This wires together:
/// - config loading
/// - pipeline / core / async shell
/// - process backend
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_and_validate(&args.config)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(0);
    }

    let (events_tx, events_rx) = event_queue();
    let backend = TokioProcessBackend::new(events_tx);
    let pipeline = Pipeline::new(&cfg, Box::new(backend));

    let options = RuntimeOptions {
        exit_when_idle: args.task.is_some(),
    };
    let mut core = CoreRuntime::new(pipeline, options);

    match &args.task {
        Some(name) => {
            let task = cfg
                .task_index(name)
                .ok_or_else(|| TaskdeckError::TaskNotFound(name.clone()))?;
            info!(task = %name, "running single task");
            core.run_task(task, RunModifiers::live());
        }
        None => {
            println!(
                "taskdeck: {} tasks loaded from {} (type 'help' for commands)",
                cfg.task.len(),
                args.config
            );
        }
    }

    // Ctrl-C → kill the running process, or quit when idle.
    let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            if interrupt_tx.send(()).is_err() {
                return;
            }
        }
    });

    let input = BufReader::new(tokio::io::stdin());
    let runtime = Runtime::new(
        core,
        events_rx,
        interrupt_rx,
        input,
        Box::new(std::io::stdout()),
    );
    Ok(runtime.run().await?)
}

/// Print tasks, commands and resolved execution orders.
fn print_dry_run(cfg: &ConfigFile) {
    let tasks = TaskList::from_config(cfg);

    println!("taskdeck dry-run");
    println!("  config.history_limit = {}", cfg.config.history_limit);
    if let Some(debug_command) = &cfg.config.debug_command {
        println!("  config.debug_command = {debug_command}");
    }
    if let Some(terminal_command) = &cfg.config.terminal_command {
        println!("  config.terminal_command = {terminal_command}");
    }
    println!();

    println!("tasks ({}):", tasks.len());
    for (i, task) in tasks.iter().enumerate() {
        println!("  {}. {}", i + 1, task.name);
        println!("      command: {}", task.command);
        if task.is_gtest {
            println!("      test binary: true");
        }
        if !task.pre_tasks.is_empty() {
            let order: Vec<&str> = task
                .pre_tasks
                .iter()
                .filter_map(|&p| tasks.get(p).map(|t| t.name.as_str()))
                .chain(std::iter::once(task.name.as_str()))
                .collect();
            println!("      order: {}", order.join(" -> "));
        }
    }

    debug!("dry-run complete (no execution)");
}
