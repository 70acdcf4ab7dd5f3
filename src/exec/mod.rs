// src/exec/mod.rs

//! Process execution layer (the OS boundary).
//!
//! This module is responsible for actually running shell commands, using
//! `tokio::process::Command`, and reporting their output and exit back to
//! the control loop through a single event queue.
//!
//! - [`events`] defines the queue, its events and the per-process
//!   [`EventSink`] callbacks.
//! - [`backend`] provides the `ProcessBackend` trait and the
//!   `TokioProcessBackend` used in production, which tests can replace with
//!   a fake implementation.
//! - [`process_runner`] drives a single child process.

pub mod backend;
pub mod events;
pub mod process_runner;

pub use backend::{ProcessBackend, TokioProcessBackend};
pub use events::{event_queue, EventReceiver, EventSender, EventSink, ProcessEvent, ProcessId};
