//! The public face of a test session.
//!
//! A [`Session`] ties together one pty, one child process and one terminal
//! emulator. Tests drive it with a small vocabulary: send input, wait for
//! the screen to settle or the process to finish, then query cells.
//!
//! # Invariants
//!
//! 1. Bytes reach the emulator in exactly the order the pty produced them.
//! 2. Queries read a snapshot taken after the most recent wait, so two
//!    queries with no wait between them always agree.
//! 3. [`Session::close`] kills the child, closes the capture pipes, then
//!    closes the pty. Calling it again does nothing.
//! 4. Dropping a session closes it.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Spawn failure | Executable missing or not runnable | `start` returns `Spawn` |
//! | Wait timeout | Budget elapsed | `Timeout`; process keeps running |
//! | Send after exit | Child is gone | `Io` with `BrokenPipe` |
//! | Bad coordinates | Span leaves the grid | `OutOfBounds` |

use std::cell::OnceCell;
use std::io;
use std::time::Duration;

use tracing::debug;

use super::monitor::{Finished, Monitor, Settled};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::process::{ExitState, Process};
use crate::pty::PtyChannel;
use crate::terminal::{Color, Emulator, Grid, Style, Vt100Engine};

/// A running program on a virtual terminal.
pub struct Session {
    config: HarnessConfig,
    channel: PtyChannel,
    process: Process,
    engine: Box<dyn Emulator>,
    /// Grid as of the last wait. Filled lazily by the first query.
    snapshot: OnceCell<Grid>,
    closed: bool,
}

impl Session {
    /// Start `config.executable` on a fresh terminal.
    ///
    /// Any stdin payload has been delivered by the time this returns.
    pub fn start(config: HarnessConfig) -> Result<Self> {
        // vt100 cannot build a zero-sized screen, so validate first.
        config.validate()?;
        let engine = Vt100Engine::new(config.columns, config.lines);
        Self::spawn(config, Box::new(engine))
    }

    /// Start with a caller-supplied emulator of the configured size.
    pub fn start_with_engine(config: HarnessConfig, engine: Box<dyn Emulator>) -> Result<Self> {
        config.validate()?;
        let size = (config.columns, config.lines);
        if engine.size() != size {
            let (columns, lines) = engine.size();
            return Err(HarnessError::InvalidConfig(format!(
                "emulator is {columns}x{lines} but the terminal is {}x{}",
                size.0, size.1
            )));
        }
        Self::spawn(config, engine)
    }

    /// Open the pty and spawn the child for an already validated config.
    fn spawn(config: HarnessConfig, engine: Box<dyn Emulator>) -> Result<Self> {
        let (mut channel, slave) = PtyChannel::open(config.columns, config.lines)?;
        let process = Process::spawn(&config, slave, &mut channel)?;
        debug!(
            pid = process.pid(),
            executable = %config.executable.display(),
            columns = config.columns,
            lines = config.lines,
            "session started"
        );

        Ok(Self {
            config,
            channel,
            process,
            engine,
            snapshot: OnceCell::new(),
            closed: false,
        })
    }

    /// Configuration the session was started with.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Terminal size as (columns, lines).
    pub fn size(&self) -> (u16, u16) {
        self.channel.size()
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Exit state as of the last wait or send.
    pub fn exit_state(&self) -> ExitState {
        self.process.state()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Type `bytes` into the terminal.
    ///
    /// Fails once the session is closed or the process has exited. When
    /// the pty input queue is full because the program is not reading,
    /// this blocks for at most two seconds before failing with an `Io`
    /// error of kind `TimedOut`.
    pub fn send(&mut self, bytes: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_open()?;
        if self.process.poll_exit()?.is_some() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "process has exited").into());
        }
        self.channel.write(bytes.as_ref())
    }

    /// Wait for the process to exit, using the configured timeout.
    pub fn wait_for_finished(&mut self) -> Result<Finished> {
        self.wait_for_finished_within(self.config.timing.finish_timeout())
    }

    /// Wait up to `timeout` for the process to exit.
    ///
    /// All output produced before exit has been applied to the grid when
    /// this returns. Calling it again after exit returns the same result.
    pub fn wait_for_finished_within(&mut self, timeout: Duration) -> Result<Finished> {
        self.ensure_open()?;
        let poll_interval = self.config.timing.poll_interval();
        let result = self.monitor().wait_for_finished(timeout, poll_interval);
        self.snapshot.take();
        result
    }

    /// Wait for output to settle, using the configured window and timeout.
    pub fn wait_for_stable_output(&mut self) -> Result<Settled> {
        let timing = self.config.timing;
        self.wait_for_stable_output_within(timing.stable_timeout(), timing.quiescence_window())
    }

    /// Wait up to `timeout` until no output has arrived for `quiescence`.
    ///
    /// Returns early with [`Settled::Exited`] when the process exits.
    pub fn wait_for_stable_output_within(
        &mut self,
        timeout: Duration,
        quiescence: Duration,
    ) -> Result<Settled> {
        self.ensure_open()?;
        let poll_interval = self.config.timing.poll_interval();
        let result = self
            .monitor()
            .wait_for_stable_output(timeout, quiescence, poll_interval);
        self.snapshot.take();
        result
    }

    /// Text of `length` cells starting at (line, column).
    pub fn string_at(&self, line: usize, column: usize, length: usize) -> Result<String> {
        self.grid().string_at(line, column, length)
    }

    pub fn foreground_at(&self, line: usize, column: usize) -> Result<Color> {
        self.grid().foreground_at(line, column)
    }

    pub fn background_at(&self, line: usize, column: usize) -> Result<Color> {
        self.grid().background_at(line, column)
    }

    pub fn has_style_at(&self, line: usize, column: usize, style: Style) -> Result<bool> {
        self.grid().has_style_at(line, column, style)
    }

    /// Whole screen as text, trailing blanks trimmed.
    pub fn screen_text(&self) -> String {
        self.grid().text()
    }

    /// Cursor position as (line, column).
    pub fn cursor(&self) -> (u16, u16) {
        self.grid().cursor()
    }

    /// Copy of the current grid.
    pub fn snapshot(&self) -> Grid {
        self.grid().clone()
    }

    /// Kill the process, close the capture pipes, then close the pty.
    ///
    /// Idempotent. The last grid stays queryable.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.process.terminate();
        self.process.close_captures();
        self.channel.close();
        debug!(pid = self.process.pid(), status = ?self.process.state().status, "session closed");
    }

    fn grid(&self) -> &Grid {
        self.snapshot.get_or_init(|| self.engine.snapshot())
    }

    fn monitor(&mut self) -> Monitor<'_> {
        Monitor {
            channel: &mut self.channel,
            process: &mut self.process,
            engine: self.engine.as_mut(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(HarnessError::closed("session"));
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("executable", &self.config.executable)
            .field("pid", &self.process.pid())
            .field("size", &self.channel.size())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
