//! Test sessions: the facade plus the wait loops behind it.
//!
//! This module provides:
//! - `Session` - One program running on a virtual terminal
//! - `Settled` / `Finished` - Outcomes of the two wait primitives

pub mod harness;
mod monitor;

pub use harness::Session;
pub use monitor::{Finished, Settled};
