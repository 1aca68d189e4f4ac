//! Master side of a pseudo-terminal.
//!
//! [`PtyChannel`] owns the master fd in non-blocking mode. The slave fd
//! returned by [`PtyChannel::open`] is meant to be handed to the child and
//! dropped by the parent right after spawn.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::{openpty, Winsize};
use tracing::{debug, trace};

use crate::error::{HarnessError, Result};

/// Size of a single read from the master.
const READ_CHUNK: usize = 4096;

/// How long a write may wait for room in the pty input queue.
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Handles the master end of a PTY pair.
#[derive(Debug)]
pub struct PtyChannel {
    master: Option<File>,
    /// Set once the slave side has gone away.
    eof: bool,
    columns: u16,
    lines: u16,
}

impl PtyChannel {
    /// Allocate a pty pair of the given size.
    ///
    /// Returns the channel and the slave fd. Both ends are close-on-exec so
    /// they never leak into the child beyond its standard streams.
    pub fn open(columns: u16, lines: u16) -> Result<(Self, OwnedFd)> {
        let winsize = Winsize {
            ws_row: lines,
            ws_col: columns,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let pair = openpty(&winsize, None).map_err(HarnessError::Device)?;

        set_cloexec(&pair.master).map_err(HarnessError::Device)?;
        set_cloexec(&pair.slave).map_err(HarnessError::Device)?;
        set_nonblocking(&pair.master).map_err(HarnessError::Device)?;

        debug!(
            master = pair.master.as_raw_fd(),
            slave = pair.slave.as_raw_fd(),
            columns,
            lines,
            "opened pty"
        );

        let channel = Self {
            master: Some(File::from(pair.master)),
            eof: false,
            columns,
            lines,
        };
        Ok((channel, pair.slave))
    }

    /// Terminal size as (columns, lines).
    pub fn size(&self) -> (u16, u16) {
        (self.columns, self.lines)
    }

    /// Whether the last read found the slave side closed by every process
    /// holding it.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn is_closed(&self) -> bool {
        self.master.is_none()
    }

    /// Write all of `bytes` to the terminal, as if typed.
    ///
    /// Either the whole payload is queued or an error is returned.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let master = self
            .master
            .as_mut()
            .ok_or_else(|| HarnessError::closed("pty channel"))?;

        let deadline = Instant::now() + WRITE_STALL_TIMEOUT;
        let mut remaining = bytes;
        while !remaining.is_empty() {
            match master.write(remaining) {
                Ok(0) => {
                    return Err(
                        io::Error::new(io::ErrorKind::WriteZero, "pty accepted no bytes").into(),
                    );
                }
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "pty input queue stayed full",
                        )
                        .into());
                    }
                    wait_for(master.as_fd(), PollFlags::POLLOUT, deadline - now)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        master.flush()?;

        trace!(bytes = bytes.len(), "wrote to pty");
        Ok(())
    }

    /// Drain whatever output is ready right now, one chunk at a time.
    ///
    /// The iterator never blocks; it ends as soon as no more data is
    /// immediately available or the slave side has closed.
    pub fn read_available(&mut self) -> ReadAvailable<'_> {
        ReadAvailable { channel: self }
    }

    /// Block for up to `timeout` until output is ready to read.
    ///
    /// Returns `true` when a read would not block. After EOF this only
    /// sleeps, since a hung-up master is always "ready".
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        match self.master.as_ref() {
            Some(master) if !self.eof => {
                wait_for(master.as_fd(), PollFlags::POLLIN, timeout).map_err(Into::into)
            }
            _ => {
                std::thread::sleep(timeout);
                Ok(false)
            }
        }
    }

    /// Close the master. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(master) = self.master.take() {
            debug!(master = master.as_raw_fd(), "closing pty");
        }
        self.eof = true;
    }

    fn read_chunk(&mut self) -> Option<io::Result<Vec<u8>>> {
        // No early return on `eof`: a child whose standard streams are all
        // redirected may still open /dev/tty later and revive the slave.
        let master = self.master.as_mut()?;

        let mut buf = [0u8; READ_CHUNK];
        loop {
            match master.read(&mut buf) {
                Ok(0) => {
                    self.eof = true;
                    return None;
                }
                Ok(n) => {
                    self.eof = false;
                    return Some(Ok(buf[..n].to_vec()));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                // Linux reports a closed slave as EIO rather than EOF.
                Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => {
                    trace!("pty slave closed");
                    self.eof = true;
                    return None;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Lazy sequence of ready output chunks. See [`PtyChannel::read_available`].
pub struct ReadAvailable<'a> {
    channel: &'a mut PtyChannel,
}

impl Iterator for ReadAvailable<'_> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.channel.read_chunk()
    }
}

/// Poll a single fd for `events`, up to `timeout`.
fn wait_for(
    fd: BorrowedFd<'_>,
    events: PollFlags,
    timeout: Duration,
) -> io::Result<bool> {
    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    let mut fds = [PollFd::new(fd, events)];
    match poll(&mut fds, PollTimeout::from(millis)) {
        Ok(0) => Ok(false),
        Ok(_) => Ok(fds[0].revents().is_some_and(|r| !r.is_empty())),
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn set_cloexec(fd: &OwnedFd) -> nix::Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}

pub(crate) fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}
