//! Pseudo-terminal allocation and raw byte I/O.

mod channel;

pub use channel::{PtyChannel, ReadAvailable};
pub(crate) use channel::{set_cloexec, set_nonblocking};
