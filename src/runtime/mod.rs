//! Runtime module: extension registry, command routing and the host

pub mod host;
pub mod registry;
pub mod router;

pub use host::{Host, HostBuilder, EVENT_BUS_KEY, OPERATION_KEY, SETTINGS_KEY, STORAGE_KEY};
pub use registry::{ExtensionRegistry, RegistryConfig};
pub use router::CommandRouter;
