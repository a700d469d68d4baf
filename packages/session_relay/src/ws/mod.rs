//! Relay WebSocket
//!
//! One connection per peer. Peers join session rooms and push chat, status
//! and lifecycle events; everything a peer receives arrives through the rooms
//! it has joined, except the `joined` acknowledgement.

pub(crate) mod dispatch;
mod handler;
pub mod protocol;

pub use handler::handle_relay_ws;
