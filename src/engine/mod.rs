// src/engine/mod.rs

//! Interactive orchestration engine for taskdeck.
//!
//! This module ties together:
//! - prompt command parsing ([`command`])
//! - the pure core state machine that runs every command as a scheduler
//!   process on top of the execution pipeline ([`core`])
//! - the async/IO shell that reads stdin, waits for process events and
//!   Ctrl-C, and prints output ([`runtime`])

pub mod command;
pub mod core;
pub mod runtime;

pub use command::UserCommand;
pub use core::{CoreRuntime, Session};
pub use runtime::Runtime;

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// If true, stop once all scheduled work is done instead of waiting for
    /// more input (used for `--task`).
    pub exit_when_idle: bool,
}
