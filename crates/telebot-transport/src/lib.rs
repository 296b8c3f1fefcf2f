//! `telebot-transport` – the authenticated operator socket.
//!
//! A WebSocket server that challenges every connecting client and only
//! attaches a command listener once the challenge has been answered with the
//! shared secret. The server knows nothing about drive or servo semantics:
//! authenticated command frames are re-emitted verbatim as
//! [`ServerEvent::Command`][server::ServerEvent::Command] values for the
//! kernel to interpret, and status updates flow back to every authenticated
//! client through a broadcast channel.

pub mod server;

pub use server::{ServerEvent, SocketServer, TransportConfig};
