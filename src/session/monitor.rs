//! Waiting for output to settle or for the process to finish.
//!
//! Both waits run a single-threaded loop: poll the pty for readiness, drain
//! every ready chunk into the emulator in read order, drain the capture
//! pipes, then decide whether to return. Nothing else mutates the grid.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{HarnessError, Result};
use crate::process::{ExitState, Process};
use crate::pty::PtyChannel;
use crate::terminal::Emulator;

/// How long to keep draining after exit while the slave is still held open.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Chunks read per pump, so a flood of output cannot starve the deadline.
const MAX_CHUNKS_PER_PUMP: usize = 256;

/// How `wait_for_stable_output` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// No output arrived for the whole quiescence window.
    Quiescent,
    /// The process exited, so no more output can come.
    Exited(ExitState),
}

/// Result of `wait_for_finished`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finished {
    pub pid: u32,
    /// Exit code; `128 + signal` for a killed process.
    pub status: i32,
    /// Everything written to stdout, when stdout was captured.
    pub stdout: Option<String>,
    /// Everything written to stderr, when stderr was captured.
    pub stderr: Option<String>,
}

impl Finished {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn exit_state(&self) -> ExitState {
        ExitState {
            pid: self.pid,
            status: Some(self.status),
        }
    }
}

/// Borrowed view of one session's I/O for the duration of a wait.
pub(crate) struct Monitor<'a> {
    pub channel: &'a mut PtyChannel,
    pub process: &'a mut Process,
    pub engine: &'a mut dyn Emulator,
}

impl Monitor<'_> {
    /// Block until the process exits, feeding output all the while.
    ///
    /// On timeout the process is left running.
    pub fn wait_for_finished(
        &mut self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Finished> {
        let start = Instant::now();
        loop {
            self.pump(poll_interval)?;

            if let Some(state) = self.process.poll_exit()? {
                self.drain_after_exit(poll_interval)?;
                let finished = Finished {
                    pid: state.pid,
                    status: state.status.unwrap_or_default(),
                    stdout: self.process.captured_stdout(),
                    stderr: self.process.captured_stderr(),
                };
                debug!(
                    pid = finished.pid,
                    status = finished.status,
                    elapsed = ?start.elapsed(),
                    "process finished"
                );
                return Ok(finished);
            }

            if start.elapsed() >= timeout {
                debug!(?timeout, "timed out waiting for process to finish");
                return Err(HarnessError::Timeout {
                    operation: "process to finish",
                    waited: timeout,
                });
            }
        }
    }

    /// Block until no output has arrived for `quiescence`, or the process
    /// exits.
    pub fn wait_for_stable_output(
        &mut self,
        timeout: Duration,
        quiescence: Duration,
        poll_interval: Duration,
    ) -> Result<Settled> {
        let start = Instant::now();
        let mut last_output = start;
        loop {
            if self.pump(poll_interval)? > 0 {
                last_output = Instant::now();
            }

            if let Some(state) = self.process.poll_exit()? {
                self.drain_after_exit(poll_interval)?;
                debug!(pid = state.pid, status = ?state.status, "output settled by exit");
                return Ok(Settled::Exited(state));
            }

            let now = Instant::now();
            if now.duration_since(last_output) >= quiescence {
                debug!(elapsed = ?start.elapsed(), "output stable");
                return Ok(Settled::Quiescent);
            }
            if now.duration_since(start) >= timeout {
                debug!(?timeout, "timed out waiting for stable output");
                return Err(HarnessError::Timeout {
                    operation: "stable output",
                    waited: timeout,
                });
            }
        }
    }

    /// Wait up to `wait` for output, then feed whatever is ready.
    ///
    /// Returns the number of bytes fed to the emulator.
    fn pump(&mut self, wait: Duration) -> Result<usize> {
        self.channel.wait_readable(wait)?;
        self.drain()
    }

    fn drain(&mut self) -> Result<usize> {
        let mut fed = 0;
        for chunk in self.channel.read_available().take(MAX_CHUNKS_PER_PUMP) {
            let chunk = chunk?;
            fed += chunk.len();
            self.engine.feed(&chunk);
        }
        self.process.drain_captures()?;
        if fed > 0 {
            trace!(bytes = fed, "fed output to terminal engine");
        }
        Ok(fed)
    }

    /// Collect output still buffered in the pty after exit.
    ///
    /// Stops at EOF, or after a short grace period when something else
    /// (a background grandchild) still holds the slave open.
    fn drain_after_exit(&mut self, poll_interval: Duration) -> Result<()> {
        let deadline = Instant::now() + EXIT_DRAIN_GRACE;
        loop {
            self.drain()?;
            if self.channel.is_eof() || self.channel.is_closed() || Instant::now() >= deadline {
                return Ok(());
            }
            self.channel.wait_readable(poll_interval)?;
        }
    }
}
