//! Child process spawning and lifecycle control.
//!
//! # Invariants
//!
//! 1. **Single ownership**: each `Process` owns exactly one child.
//! 2. **Controlling terminal**: the child leads a new session whose
//!    controlling terminal is the pty slave.
//! 3. **Clean termination**: `terminate()` and `Drop` kill the child's
//!    process group if it is still running and always reap it.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Executable not found | Bad path or not on `$PATH` | `spawn()` returns `Spawn` |
//! | Exec failure | Not executable, bad interpreter | `spawn()` returns `Spawn` |
//! | Timeout on wait | Process still running | `Timeout`, process untouched |
//! | Kill failure | Process already gone | Ignored, teardown still reaps |

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{pipe, setsid, Pid};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::{HarnessConfig, StdinSource};
use crate::error::{HarnessError, Result};
use crate::pty::{set_cloexec, set_nonblocking, PtyChannel};

/// Sleep between exit checks in [`Process::wait_exit`].
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Process state as seen by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitState {
    pub pid: u32,
    /// Exit code once the process has finished. A child killed by a signal
    /// reports `128 + signal`.
    pub status: Option<i32>,
}

impl ExitState {
    pub fn is_finished(&self) -> bool {
        self.status.is_some()
    }
}

/// Read end of a pipe standing in for one of the child's standard streams.
#[derive(Debug)]
struct CapturePipe {
    file: Option<File>,
    buffer: Vec<u8>,
}

impl CapturePipe {
    /// Create the pipe. Returns the capture and the write end for the child.
    fn open() -> Result<(Self, OwnedFd)> {
        let (read_end, write_end) = pipe().map_err(HarnessError::Device)?;
        set_cloexec(&read_end).map_err(HarnessError::Device)?;
        set_cloexec(&write_end).map_err(HarnessError::Device)?;
        set_nonblocking(&read_end).map_err(HarnessError::Device)?;

        let capture = Self {
            file: Some(File::from(read_end)),
            buffer: Vec::new(),
        };
        Ok((capture, write_end))
    }

    /// Move everything currently in the pipe into the buffer.
    fn drain(&mut self) -> io::Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };

        let mut total = 0;
        let mut buf = [0u8; 4096];
        loop {
            match file.read(&mut buf) {
                Ok(0) => {
                    // Every writer is gone; nothing more can arrive.
                    self.file = None;
                    break;
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&buf[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    fn close(&mut self) {
        self.file = None;
    }
}

/// A child process attached to a pseudo-terminal.
#[derive(Debug)]
pub struct Process {
    child: Child,
    pid: u32,
    stdout: Option<CapturePipe>,
    stderr: Option<CapturePipe>,
    status: Option<i32>,
}

impl Process {
    /// Spawn the configured program with the pty slave as its terminal.
    ///
    /// The slave is consumed: the parent's copy is closed once the child
    /// has it. The configured stdin payload is delivered before this
    /// returns, so it always precedes any input sent later.
    pub fn spawn(
        config: &HarnessConfig,
        slave: OwnedFd,
        channel: &mut PtyChannel,
    ) -> Result<Self> {
        let executable = config.executable.display().to_string();

        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.args).envs(config.child_env());

        let mut stdin_pipe = None;
        match (&config.stdin, config.stdin_source) {
            (Some(_), StdinSource::Pipe) => {
                let (read_end, write_end) = pipe().map_err(HarnessError::Device)?;
                set_cloexec(&read_end).map_err(HarnessError::Device)?;
                set_cloexec(&write_end).map_err(HarnessError::Device)?;
                cmd.stdin(Stdio::from(read_end));
                stdin_pipe = Some(File::from(write_end));
            }
            _ => {
                cmd.stdin(Stdio::from(slave.try_clone()?));
            }
        }

        let stdout = if config.capture_stdout {
            let (capture, write_end) = CapturePipe::open()?;
            cmd.stdout(Stdio::from(write_end));
            Some(capture)
        } else {
            cmd.stdout(Stdio::from(slave.try_clone()?));
            None
        };

        let stderr = if config.capture_stderr {
            let (capture, write_end) = CapturePipe::open()?;
            cmd.stderr(Stdio::from(write_end));
            Some(capture)
        } else {
            cmd.stderr(Stdio::from(slave.try_clone()?));
            None
        };

        let slave_fd = slave.as_raw_fd();
        // SAFETY: setsid and ioctl are async-signal-safe and touch no
        // memory shared with the parent.
        unsafe {
            cmd.pre_exec(move || {
                setsid()?;
                if nix::libc::ioctl(slave_fd, nix::libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            executable: executable.clone(),
            source,
        })?;

        // Close the parent's copies of the child's ends.
        drop(cmd);
        drop(slave);

        let pid = child.id();
        debug!(pid, executable = %executable, args = ?config.args, "spawned process");

        let process = Self {
            child,
            pid,
            stdout,
            stderr,
            status: None,
        };

        match (config.stdin.as_deref(), stdin_pipe) {
            (Some(payload), Some(mut writer)) => match writer.write_all(payload) {
                Ok(()) => trace!(pid, bytes = payload.len(), "wrote stdin payload to pipe"),
                // The child closed stdin without reading it all.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(pid, "stdin pipe closed early");
                }
                Err(e) => return Err(e.into()),
            },
            (Some(payload), None) if !payload.is_empty() => {
                channel.write(payload)?;
                trace!(pid, bytes = payload.len(), "wrote stdin payload to pty");
            }
            _ => {}
        }

        Ok(process)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Current state without blocking. Does not check for a new exit.
    pub fn state(&self) -> ExitState {
        ExitState {
            pid: self.pid,
            status: self.status,
        }
    }

    /// Check for exit without blocking. Reaps the child once it has exited.
    pub fn poll_exit(&mut self) -> Result<Option<ExitState>> {
        if self.status.is_none() {
            if let Some(status) = self.child.try_wait()? {
                let code = exit_code(status);
                debug!(pid = self.pid, status = code, "process exited");
                self.status = Some(code);
            }
        }
        Ok(self.status.map(|_| self.state()))
    }

    /// Block until the process exits or `timeout` elapses.
    ///
    /// On timeout the process is left running.
    pub fn wait_exit(&mut self, timeout: Duration) -> Result<ExitState> {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain_captures()?;
            if let Some(state) = self.poll_exit()? {
                return Ok(state);
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::Timeout {
                    operation: "process exit",
                    waited: timeout,
                });
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Pull pending bytes out of the capture pipes so the child never
    /// blocks on a full pipe.
    pub fn drain_captures(&mut self) -> Result<usize> {
        let mut total = 0;
        for capture in [self.stdout.as_mut(), self.stderr.as_mut()]
            .into_iter()
            .flatten()
        {
            total += capture.drain()?;
        }
        if total > 0 {
            trace!(pid = self.pid, bytes = total, "drained captured output");
        }
        Ok(total)
    }

    /// Captured stdout so far, or `None` when stdout is not captured.
    pub fn captured_stdout(&self) -> Option<String> {
        self.stdout.as_ref().map(CapturePipe::text)
    }

    /// Captured stderr so far, or `None` when stderr is not captured.
    pub fn captured_stderr(&self) -> Option<String> {
        self.stderr.as_ref().map(CapturePipe::text)
    }

    /// Kill the process group if still running, then reap the child.
    ///
    /// Idempotent.
    pub fn terminate(&mut self) {
        if self.status.is_some() {
            return;
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            self.status = Some(exit_code(status));
            return;
        }

        debug!(pid = self.pid, "killing process group");
        match killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                warn!(pid = self.pid, error = %e, "killpg failed, killing child only");
                let _ = self.child.kill();
            }
        }

        match self.child.wait() {
            Ok(status) => self.status = Some(exit_code(status)),
            Err(e) => warn!(pid = self.pid, error = %e, "failed to reap process"),
        }
    }

    /// Close the capture pipes. Captured text stays available.
    pub fn close_captures(&mut self) {
        for capture in [self.stdout.as_mut(), self.stderr.as_mut()]
            .into_iter()
            .flatten()
        {
            capture.close();
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}
