//! Server-side components of the `sigbridge` background host.
//!
//! This module contains everything the background context runs: the message
//! bridge that connects isolated contexts, the signing flow that races
//! authentication against chunk streaming, and the module dispatcher that
//! answers API calls.
//!
//! ## Submodules
//!
//! - [`bridge`] - The [`MessageBridge`](bridge::MessageBridge) abstraction and
//!   its in-process [`Hub`](bridge::Hub) implementation.
//! - [`relay`] - Length-delimited socket transport attaching remote contexts
//!   to the hub.
//! - [`auth`] - The authentication collaborator contract and its bridge-backed
//!   implementation.
//! - [`signing`] - The auth orchestrator and its settle-once plumbing.
//! - [`dispatch`] - Module registry and the built-in wallet modules.
//! - [`service`] - API call handling on top of the dispatcher.
//! - [`wallet`] - Read-only wallet state served by the modules.
//! - [`config`] - CLI/env configuration.
//! - [`telemetry`] - Tracing and metrics initialization (optional).

pub mod auth;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod relay;
pub mod service;
pub mod signing;
pub mod telemetry;
pub mod wallet;
