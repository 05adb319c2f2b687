//! WebSocket server module
//!
//! Accepts client connections and runs one handler per connection on top of
//! the shared hub.

mod handler;
mod websocket;

pub use handler::*;
pub use websocket::*;
