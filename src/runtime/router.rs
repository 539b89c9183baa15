//! Command routing from front-end invocations to extensions

use crate::core::{CommandResult, CommandSpec, ExecutionContext};
use crate::error::{Result, RuntimeError};
use crate::runtime::registry::ExtensionRegistry;
use std::sync::Arc;

/// Maps an `(extension, command, args)` triple onto the named extension.
#[derive(Clone)]
pub struct CommandRouter {
    registry: Arc<ExtensionRegistry>,
}

impl CommandRouter {
    pub fn new(registry: Arc<ExtensionRegistry>) -> Self {
        Self { registry }
    }

    /// Forwards to `handle_command` and passes its result back untouched.
    ///
    /// Fails with `NotFound` for unknown extensions and `NotEnabled` for
    /// disabled ones.
    pub async fn route(
        &self,
        ctx: &ExecutionContext,
        extension: &str,
        command: &str,
        args: &[String],
    ) -> Result<CommandResult> {
        let target = self.registry.get(extension)?;
        if !self.registry.is_enabled(extension) {
            return Err(RuntimeError::NotEnabled(extension.to_string()));
        }

        tracing::debug!(extension, command, args = args.len(), "routing command");
        target.handle_command(ctx, command, args).await
    }

    /// Command descriptors of an extension, enabled or not.
    pub fn commands(&self, extension: &str) -> Result<Vec<CommandSpec>> {
        Ok(self.registry.get(extension)?.commands())
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }
}
