//! PTY session management
//!
//! `PtyManager` is the registry of live sessions; `spawn_manager` moves it
//! onto its own task and hands out `ManagerHandle`s to the connections.

mod actor;
#[cfg(test)]
pub(crate) mod fake;
mod registry;

pub use actor::*;
pub use registry::*;
