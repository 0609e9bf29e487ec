//! Background module dispatch.
//!
//! - [`registry`] - Name to handler table, validated once at startup.
//! - [`modules`] - The built-in wallet and signing modules.

pub mod modules;
pub mod registry;

pub use modules::background_modules;
pub use registry::{BackgroundModule, Connection, ModuleFunction, ModuleRegistry};
