// src/engine/runtime.rs

use std::fmt;
use std::io::Write;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::EventReceiver;

use super::core::CoreRuntime;

const PROMPT: &str = "> ";

/// Async IO shell around [`CoreRuntime`].
///
/// While a process is active it blocks on the process event queue (and
/// Ctrl-C); otherwise it reads the next line of input. All semantics live in
/// the core; this struct only moves data between the channels, the input and
/// the output.
pub struct Runtime<R> {
    core: CoreRuntime,
    events: EventReceiver,
    interrupts: mpsc::UnboundedReceiver<()>,
    input: Lines<R>,
    output: Box<dyn Write + Send>,
}

impl<R> fmt::Debug for Runtime<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<R: AsyncBufRead + Unpin> Runtime<R> {
    pub fn new(
        core: CoreRuntime,
        events: EventReceiver,
        interrupts: mpsc::UnboundedReceiver<()>,
        input: R,
        output: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            core,
            events,
            interrupts,
            input: input.lines(),
            output,
        }
    }

    /// Main loop. Returns the process exit status.
    pub async fn run(mut self) -> Result<i32> {
        info!("taskdeck runtime started");

        loop {
            self.flush_output()?;
            if self.core.should_exit() {
                info!("core requested exit; stopping runtime");
                break;
            }

            if self.core.has_active_process() {
                tokio::select! {
                    event = self.events.recv() => match event {
                        Some(event) => {
                            debug!(?event, "runtime received process event");
                            self.core.on_event(event);
                        }
                        None => {
                            warn!("process event queue closed while a process is active");
                            break;
                        }
                    },
                    Some(()) = self.interrupts.recv() => self.core.interrupt(),
                }
                continue;
            }

            self.write_prompt()?;
            tokio::select! {
                line = self.input.next_line() => {
                    match line.context("reading input")? {
                        Some(line) => self.core.submit_line(&line),
                        None => {
                            info!("input closed; exiting");
                            break;
                        }
                    }
                }
                Some(()) = self.interrupts.recv() => {
                    writeln!(self.output).context("writing output")?;
                    self.core.interrupt();
                }
            }
        }

        self.flush_output()?;
        info!("runtime exiting");
        Ok(self.core.exit_code())
    }

    fn write_prompt(&mut self) -> Result<()> {
        write!(self.output, "{PROMPT}").context("writing prompt")?;
        self.output.flush().context("flushing output")?;
        Ok(())
    }

    fn flush_output(&mut self) -> Result<()> {
        let lines = self.core.take_output();
        if lines.is_empty() {
            return Ok(());
        }
        for line in lines {
            writeln!(self.output, "{line}").context("writing output")?;
        }
        self.output.flush().context("flushing output")?;
        Ok(())
    }
}
