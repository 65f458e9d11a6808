//! The `transport` module exposes the broker and the orchestration engine
//! over WebSockets.
//!
//! It defines the JSON protocol between processes, the control server that
//! answers it, and the clients used by out-of-process producers and
//! consumers.

pub mod client;
pub mod message;
pub mod websocket;

pub use client::{ControlClient, Registration, RemoteConsumer};
pub use message::{ClientMessage, ServerMessage};
pub use websocket::{ServerContext, serve, start_control_server};

#[cfg(test)]
mod tests;
