//! Socket transport for remote contexts.
//!
//! Each connection carries one context. After a `hello` frame the context is
//! attached to the [`Hub`](crate::server::bridge::Hub) under its address:
//! its `message` frames are routed through the hub, and everything the hub
//! queues for it is written back as `message` frames.
//!
//! ## Structure
//!
//! - [`frame`] - JSON frame definitions.
//! - [`connection`] - Per-connection handshake and pump loop.

pub mod connection;
pub mod frame;

/// A connection ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Handshake failed: {reason}")]
    Handshake { reason: String },

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
