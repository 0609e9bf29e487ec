//! Frames exchanged with a connected context.
//!
//! Every frame is a JSON object tagged by `type`, carried in one
//! length-delimited frame (`u32` big-endian length prefix).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sigbridge_core::address::{ContextAddress, SenderMeta};

/// Room reserved in a frame for everything around the payload.
pub const FRAME_OVERHEAD: usize = 4096;

/// Sent by a connected context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Must be the first frame: declares who is on the other end.
    Hello {
        context: String,
        #[serde(default, rename = "tabId", skip_serializing_if = "Option::is_none")]
        tab_id: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    Message {
        channel: String,
        destination: ContextAddress,
        payload: Value,
    },
}

/// Sent to a connected context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Acknowledges the hello with the address the context is reachable at.
    Welcome { address: ContextAddress },
    Message {
        channel: String,
        sender: SenderMeta,
        payload: Value,
    },
    /// A frame could not be handled; the connection stays open.
    Error { reason: String },
}

impl ServerFrame {
    pub fn error(reason: impl ToString) -> Self {
        Self::Error {
            reason: reason.to_string(),
        }
    }

    pub fn encode(&self) -> serde_json::Result<Bytes> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

impl ClientFrame {
    pub fn decode(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }
}
