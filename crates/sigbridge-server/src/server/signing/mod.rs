//! Transaction signing.
//!
//! ## Structure
//!
//! - [`orchestrator`] - `sign_with_auth`, racing authentication against chunk
//!   streaming.
//! - [`stream`] - Sequential chunk streaming to a ready receiver.
//! - [`settle`] - First-writer-wins result cell.
//! - [`pending`] - Per-call state torn down at settlement.

pub mod orchestrator;
pub mod pending;
pub mod settle;
pub mod stream;

pub use orchestrator::{AuthOrchestrator, SigningResult};
