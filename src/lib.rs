//! Agenticide - extension runtime
//!
//! Hosts independently developed extensions: lifecycle management, command
//! routing, a synchronous event bus and cancellable execution contexts.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;
pub mod error;
pub mod extensions;
pub mod logging;
pub mod runtime;

#[cfg(test)]
mod testing;

pub mod prelude {
    //! Commonly used types and traits

    pub use crate::config::Settings;
    pub use crate::core::{ContextBuilder, ExecutionContext};
    pub use crate::core::{handler, Event, EventBus, EventHandler};
    pub use crate::core::{CommandResult, CommandSpec, Extension, ExtensionMetadata, ExtensionUi};
    pub use crate::error::{ContextError, ErrorKind, Result, RuntimeError};
    pub use crate::runtime::{CommandRouter, ExtensionRegistry, Host, HostBuilder, RegistryConfig};
    pub use async_trait::async_trait;
}

pub use crate::core::{Event, EventBus, ExecutionContext, Extension};
pub use crate::error::{Result, RuntimeError};
pub use crate::runtime::{CommandRouter, ExtensionRegistry, Host};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn build_info() -> String {
    format!("Agenticide {}", VERSION)
}
