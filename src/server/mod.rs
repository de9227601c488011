//! WebSocket server module
//!
//! Accepts window connections, speaks the window message protocol and routes
//! each message to the session manager or the backend services.

mod handler;
mod protocol;
mod websocket;

pub use handler::*;
pub use protocol::*;
pub use websocket::*;
