//! PTY session layer
//!
//! The `Pty` capability shared by backend sessions and front-end proxies, the
//! `PtyConnector` spawning abstraction, and the portable-pty backed native
//! implementation.

mod connector;
mod process;
mod utf8;

pub use connector::*;
pub use process::*;
pub use utf8::Utf8Accumulator;
