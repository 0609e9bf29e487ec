//! API call handling.
//!
//! The [`BackgroundService`](handler::BackgroundService) listens on the
//! `api_call` channel, checks the caller's permissions, dispatches to the
//! [`ModuleRegistry`](crate::server::dispatch::ModuleRegistry) and replies to
//! the caller on `api_call_result`.

pub mod handler;

pub use handler::BackgroundService;
