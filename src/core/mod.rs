//! Core module: execution context, event bus, and extension contract

pub mod context;
pub mod event;
pub mod extension;

pub use context::{ContextBuilder, ExecutionContext};
pub use event::{
    handler, ClosureHandler, EnabledLookup, Event, EventBus, EventHandler, ExtensionHandler,
};
pub use event::{EXTENSION_DISABLED, EXTENSION_ENABLED};
pub use extension::{
    CommandResult, CommandSpec, Extension, ExtensionMetadata, ExtensionStatus, ExtensionUi,
};
