//! Shared types and error definitions used by every context that speaks the
//! signing protocol.
//!
//! ## Submodules
//!
//! - [`address`] - Context addressing (`"<context>@<tabId>"`) and sender
//!   metadata.
//! - [`types`] - Transactions, chunks, end markers and authentication
//!   messages, plus the wire-level channel names.
//! - [`decompose`] - Splits a transaction into a chunk collection.
//! - [`assemble`] - Receiver-side reassembly of a chunk collection.
//! - [`error`] - Error taxonomy shared by both sides of the bridge.

pub mod address;
pub mod assemble;
pub mod decompose;
pub mod error;
pub mod types;

pub use error::{Error, Result};
