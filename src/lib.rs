//! Relay Hub
//!
//! WebSocket broadcast hub. Every message a client sends is relayed verbatim to
//! every connected client, the sender included.

pub mod config;
pub mod hub;
pub mod server;
