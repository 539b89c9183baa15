//! Extension registry

use crate::core::{EnabledLookup, ExecutionContext, Extension, ExtensionStatus};
use crate::error::{LifecycleHook, Result, RuntimeError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Deadline of the context handed to an enable/disable hook when the
    /// caller does not supply its own. Hooks observe it cooperatively.
    pub hook_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            hook_timeout: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }
}

// `extensions` and `enabled` always hold the same key set.
#[derive(Default)]
struct RegistryState {
    extensions: HashMap<String, Arc<dyn Extension>>,
    enabled: HashMap<String, bool>,
}

/// Owns the installed extensions and their enabled flags.
///
/// State lives behind one read/write lock that is never held across an
/// await. Enable/disable transitions additionally serialize on an async
/// gate for the whole transition, hook included: readers keep going while a
/// hook runs, and the flag follows the hook's own return value.
///
/// Hooks are never abandoned. Cancellation reaches them only through the
/// context they are given.
pub struct ExtensionRegistry {
    state: RwLock<RegistryState>,
    transitions: Mutex<()>,
    config: RegistryConfig,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            transitions: Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Adds an extension in the disabled state. Never runs its hooks.
    pub fn register(&self, extension: Arc<dyn Extension>) -> Result<()> {
        let name = extension.name();
        let mut state = self.state.write();

        if state.extensions.contains_key(&name) {
            return Err(RuntimeError::AlreadyRegistered(name));
        }

        state.extensions.insert(name.clone(), extension);
        state.enabled.insert(name.clone(), false);
        tracing::debug!(extension = %name, "extension registered");
        Ok(())
    }

    pub fn register_extension<E: Extension>(&self, extension: E) -> Result<()> {
        self.register(Arc::new(extension))
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Extension>> {
        self.state
            .read()
            .extensions
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
    }

    /// Snapshot of all registered extensions, in no particular order.
    pub fn list(&self) -> Vec<Arc<dyn Extension>> {
        self.state.read().extensions.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.state.read().extensions.keys().cloned().collect()
    }

    pub fn statuses(&self) -> Vec<ExtensionStatus> {
        let state = self.state.read();
        state
            .extensions
            .iter()
            .map(|(name, extension)| ExtensionStatus {
                metadata: extension.metadata(),
                enabled: state.enabled.get(name).copied().unwrap_or(false),
            })
            .collect()
    }

    /// `false` for disabled and for unknown names alike.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.state.read().enabled.get(name).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.state.read().extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().extensions.is_empty()
    }

    pub async fn enable(&self, name: &str) -> Result<()> {
        let ctx = ExecutionContext::with_timeout(None, self.config.hook_timeout);
        let result = self.enable_with(&ctx, name).await;
        ctx.cancel();
        result
    }

    pub async fn disable(&self, name: &str) -> Result<()> {
        let ctx = ExecutionContext::with_timeout(None, self.config.hook_timeout);
        let result = self.disable_with(&ctx, name).await;
        ctx.cancel();
        result
    }

    /// Runs the extension's enable hook under `ctx` and marks it enabled on
    /// success. A no-op when already enabled. On hook failure the flag is
    /// untouched and the hook's error is returned inside `HookFailed`.
    ///
    /// An already fired `ctx` fails the call without running the hook.
    pub async fn enable_with(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        self.transition(ctx, name, LifecycleHook::Enable).await
    }

    pub async fn disable_with(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        self.transition(ctx, name, LifecycleHook::Disable).await
    }

    async fn transition(&self, ctx: &ExecutionContext, name: &str, hook: LifecycleHook) -> Result<()> {
        let target = hook == LifecycleHook::Enable;
        let _gate = self.transitions.lock().await;

        let extension = {
            let state = self.state.read();
            let extension = state
                .extensions
                .get(name)
                .cloned()
                .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
            if state.enabled.get(name).copied().unwrap_or(false) == target {
                return Ok(());
            }
            extension
        };

        ctx.check()
            .map_err(|source| RuntimeError::hook_failed(name, hook, source))?;

        let result = match hook {
            LifecycleHook::Enable => extension.enable(ctx).await,
            LifecycleHook::Disable => extension.disable(ctx).await,
        };
        result.map_err(|source| RuntimeError::hook_failed(name, hook, source))?;

        self.state.write().enabled.insert(name.to_string(), target);
        tracing::debug!(extension = %name, enabled = target, "extension state changed");
        Ok(())
    }
}

impl EnabledLookup for ExtensionRegistry {
    fn is_enabled(&self, name: &str) -> bool {
        ExtensionRegistry::is_enabled(self, name)
    }
}
