//! Front-end side of the window channel
//!
//! `ChannelBridge` correlates requests with replies, `connect` carries it
//! over WebSocket, and `PtyIpcBridge` exposes backend sessions through the
//! `Pty` trait.

mod bridge;
mod connection;
mod pty_proxy;

pub use bridge::*;
pub use connection::*;
pub use pty_proxy::*;
