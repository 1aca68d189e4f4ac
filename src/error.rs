//! Error types for harness sessions.
//!
//! Every failure a caller can observe is a [`HarnessError`]. Only
//! [`HarnessError::Timeout`] is recoverable: the session stays usable and
//! the wait can be retried.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::terminal::Style;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to spawn `{executable}`: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: io::Error,
    },

    #[error("Pseudo-terminal device error: {0}")]
    Device(#[source] nix::Error),

    #[error("PTY I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Timed out after {waited:?} waiting for {operation}")]
    Timeout {
        operation: &'static str,
        waited: Duration,
    },

    #[error(
        "Requested length {length} at ({line}, {column}) is outside the terminal of {lines} lines x {columns} columns"
    )]
    OutOfBounds {
        line: usize,
        column: usize,
        length: usize,
        lines: u16,
        columns: u16,
    },

    #[error("Style {0:?} is not tracked by the terminal engine")]
    UnsupportedStyle(Style),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Grid of {lines} lines x {columns} columns needs {expected} cells, got {actual}")]
    GridShape {
        lines: u16,
        columns: u16,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl HarnessError {
    /// True for the one recoverable kind: a wait that ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout { .. })
    }

    /// True when query coordinates fell outside the grid.
    pub fn is_out_of_bounds(&self) -> bool {
        matches!(self, HarnessError::OutOfBounds { .. })
    }

    pub(crate) fn closed(what: &str) -> Self {
        HarnessError::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            format!("{what} is closed"),
        ))
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
