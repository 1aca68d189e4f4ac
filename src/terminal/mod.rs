//! Terminal state: the cell grid and the emulators that maintain it.

pub mod engine;
pub mod types;

pub use engine::{Emulator, Vt100Engine};
pub use types::{Cell, Color, Grid, Style, StyleFlags};
