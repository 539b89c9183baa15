//! Built-in extensions

pub mod security;

pub use security::SecurityExtension;

use crate::core::Extension;
use std::sync::Arc;

/// Every extension shipped with the host, freshly constructed.
pub fn builtin() -> Vec<Arc<dyn Extension>> {
    vec![Arc::new(SecurityExtension::new())]
}
