//! Process control for the program under test.

mod controller;

pub use controller::{ExitState, Process};
