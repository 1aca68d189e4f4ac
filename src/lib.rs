//! tuitest library crate.
//!
//! Drives terminal programs on a pseudo-terminal for automated tests:
//! - Spawning a program with the pty as its controlling terminal
//! - Sending keystrokes and waiting for the screen to settle
//! - Querying text, colors and styles of the emulated screen
//! - Capturing stdout/stderr separately from the screen

pub mod config;
pub mod error;
pub mod process;
pub mod pty;
pub mod session;
pub mod terminal;

pub use config::{HarnessConfig, StdinSource, TimingConfig};
pub use error::{HarnessError, Result};
pub use process::ExitState;
pub use session::{Finished, Session, Settled};
pub use terminal::{Cell, Color, Emulator, Grid, Style, StyleFlags, Vt100Engine};
