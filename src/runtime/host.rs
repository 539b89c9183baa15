//! Host runtime: wires settings, bus, registry and router together

use crate::config::Settings;
use crate::core::{
    CommandResult, ContextBuilder, EnabledLookup, Event, EventBus, ExecutionContext, Extension,
    EXTENSION_DISABLED, EXTENSION_ENABLED,
};
use crate::error::Result;
use crate::runtime::registry::{ExtensionRegistry, RegistryConfig};
use crate::runtime::router::CommandRouter;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Context value key under which the host stores its `Settings`.
pub const SETTINGS_KEY: &str = "settings";
/// Context value key under which the host stores its `EventBus`.
pub const EVENT_BUS_KEY: &str = "event_bus";
/// Context value key for the durable storage handle, when the host has one.
pub const STORAGE_KEY: &str = "storage";
/// Context metadata key naming the operation a context was created for.
pub const OPERATION_KEY: &str = "operation";

const HOST_SOURCE: &str = "host";

/// Collects the collaborators and extensions a [`Host`] is built from.
pub struct HostBuilder {
    settings: Option<Arc<Settings>>,
    extensions: Vec<Arc<dyn Extension>>,
    event_bus: Option<Arc<EventBus>>,
    registry_config: Option<RegistryConfig>,
    root: ContextBuilder,
}

impl HostBuilder {
    pub fn new() -> Self {
        Self {
            settings: None,
            extensions: Vec::new(),
            event_bus: None,
            registry_config: None,
            root: ContextBuilder::new(),
        }
    }

    pub fn with_settings(self, settings: Settings) -> Self {
        self.with_shared_settings(Arc::new(settings))
    }

    pub fn with_shared_settings(mut self, settings: Arc<Settings>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn add_extension<E: Extension>(mut self, extension: E) -> Self {
        self.extensions.push(Arc::new(extension));
        self
    }

    pub fn add_shared_extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn add_extensions<I>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Extension>>,
    {
        self.extensions.extend(extensions);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Overrides the hook timeout otherwise read from settings.
    pub fn with_registry_config(mut self, config: RegistryConfig) -> Self {
        self.registry_config = Some(config);
        self
    }

    /// Seeds every context the host creates with `value` under `key`.
    ///
    /// `settings` and `event_bus` are always set by the host and win over
    /// values seeded under the same keys.
    pub fn with_value<T: Send + Sync + 'static>(mut self, key: impl Into<String>, value: T) -> Self {
        self.root = self.root.with_value(key, value);
        self
    }

    pub fn with_shared_value<T: Send + Sync + 'static>(
        mut self,
        key: impl Into<String>,
        value: Arc<T>,
    ) -> Self {
        self.root = self.root.with_shared(key, value);
        self
    }

    /// Hands extensions an opaque storage handle under [`STORAGE_KEY`]. The
    /// runtime itself never calls it.
    pub fn with_storage<T: Send + Sync + 'static>(self, storage: Arc<T>) -> Self {
        self.with_shared_value(STORAGE_KEY, storage)
    }

    /// Registers every extension (disabled) and subscribes the event types
    /// each one declares.
    pub fn build(self) -> Result<Host> {
        let settings = self.settings.unwrap_or_default();
        let event_bus = self.event_bus.unwrap_or_default();
        let registry_config = match self.registry_config {
            Some(config) => config,
            None => RegistryConfig::new().with_hook_timeout(settings.hook_timeout()?),
        };
        let command_timeout = settings.command_timeout()?;

        let registry = Arc::new(ExtensionRegistry::with_config(registry_config));
        for extension in self.extensions {
            let subscriptions = extension.subscriptions();
            registry.register(Arc::clone(&extension))?;
            for event_type in subscriptions {
                event_bus.subscribe_extension(
                    event_type,
                    Arc::clone(&extension),
                    Arc::clone(&registry) as Arc<dyn EnabledLookup>,
                )?;
            }
        }

        let root = self
            .root
            .with_shared(SETTINGS_KEY, Arc::clone(&settings))
            .with_shared(EVENT_BUS_KEY, Arc::clone(&event_bus))
            .build();

        tracing::debug!(extensions = registry.len(), "host built");

        Ok(Host {
            router: CommandRouter::new(Arc::clone(&registry)),
            settings,
            event_bus,
            registry,
            root,
            command_timeout,
        })
    }
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Composition root: one registry, one event bus and one router sharing
/// the same settings.
pub struct Host {
    settings: Arc<Settings>,
    event_bus: Arc<EventBus>,
    registry: Arc<ExtensionRegistry>,
    router: CommandRouter,
    root: ExecutionContext,
    command_timeout: Duration,
}

impl Host {
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    /// Fresh per-operation context bounded by `command_timeout`.
    ///
    /// Carries the settings and event bus as values and is cancelled along
    /// with the host on `shutdown`.
    pub fn context(&self, operation: &str) -> ExecutionContext {
        self.derive(operation, self.command_timeout)
    }

    fn derive(&self, operation: &str, timeout: Duration) -> ExecutionContext {
        ContextBuilder::new()
            .with_parent(&self.root)
            .with_timeout(timeout)
            .with_metadata(OPERATION_KEY, operation)
            .build()
    }

    /// Enables an extension and announces it with an `extension.enabled`
    /// event.
    ///
    /// A failing subscriber is reported as `HandlerFailed`, but the
    /// transition itself stands.
    pub async fn enable(&self, name: &str) -> Result<()> {
        let ctx = self.derive("enable", self.registry.config().hook_timeout);
        let result = match self.registry.enable_with(&ctx, name).await {
            Ok(()) => self.announce(&ctx, EXTENSION_ENABLED, name).await,
            Err(e) => Err(e),
        };
        ctx.cancel();
        result
    }

    pub async fn disable(&self, name: &str) -> Result<()> {
        let ctx = self.derive("disable", self.registry.config().hook_timeout);
        let result = match self.registry.disable_with(&ctx, name).await {
            Ok(()) => self.announce(&ctx, EXTENSION_DISABLED, name).await,
            Err(e) => Err(e),
        };
        ctx.cancel();
        result
    }

    /// Enables every name listed under `extensions_enabled`, in order,
    /// stopping at the first failure.
    pub async fn enable_configured(&self) -> Result<()> {
        for name in self.settings.extensions_enabled() {
            self.enable(&name).await?;
        }
        Ok(())
    }

    pub async fn run_command(
        &self,
        extension: &str,
        command: &str,
        args: &[String],
    ) -> Result<CommandResult> {
        let ctx = self.context(&format!("{}.{}", extension, command));
        let result = self.router.route(&ctx, extension, command, args).await;
        ctx.cancel();
        result
    }

    /// Disables every enabled extension, then cancels all outstanding
    /// contexts derived from this host.
    ///
    /// Keeps going past failures and returns the first one.
    pub async fn shutdown(&self) -> Result<()> {
        let mut names = self.registry.names();
        names.sort();

        let mut first_error = None;
        for name in names {
            if !self.registry.is_enabled(&name) {
                continue;
            }
            if let Err(e) = self.disable(&name).await {
                tracing::warn!(extension = %name, error = %e, "disable during shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        self.root.cancel();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    async fn announce(&self, ctx: &ExecutionContext, event_type: &str, name: &str) -> Result<()> {
        let extension = self.registry.get(name)?;
        let event = Event::new(event_type, HOST_SOURCE).with_data(json!({
            "name": name,
            "version": extension.version(),
        }));
        self.event_bus.publish(ctx, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handler;
    use crate::error::{ErrorKind, RuntimeError};
    use crate::testing::RecordingExtension;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_host_builder() {
        let host = Host::builder()
            .add_extension(RecordingExtension::new("alpha"))
            .add_extension(RecordingExtension::new("beta"))
            .build()
            .unwrap();

        assert_eq!(host.registry().len(), 2);
        assert!(!host.registry().is_enabled("alpha"));
        assert_eq!(
            host.registry().config().hook_timeout,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_duplicate_extension_fails_build() {
        let result = Host::builder()
            .add_extension(RecordingExtension::new("alpha"))
            .add_extension(RecordingExtension::new("alpha"))
            .build();

        assert!(matches!(result, Err(RuntimeError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_context_carries_host_values() {
        let settings = Settings::default();
        settings.set("command_timeout", "2s");
        let host = Host::builder().with_settings(settings).build().unwrap();

        let ctx = host.context("ext");
        assert_eq!(ctx.get_metadata(OPERATION_KEY).as_deref(), Some("ext"));
        assert!(ctx.get::<Settings>(SETTINGS_KEY).is_some());
        let bus = ctx.get::<EventBus>(EVENT_BUS_KEY).unwrap();
        assert!(Arc::ptr_eq(&bus, host.event_bus()));
        assert!(ctx.deadline().is_some());
        assert!(!ctx.is_done());
    }

    #[tokio::test]
    async fn test_storage_reaches_routed_commands() {
        struct MemoryStore {
            label: &'static str,
        }

        let host = Host::builder()
            .with_storage(Arc::new(MemoryStore { label: "tasks" }))
            .with_value("tenant", "acme".to_string())
            .add_extension(RecordingExtension::new("alpha"))
            .build()
            .unwrap();
        host.enable("alpha").await.unwrap();

        let args = vec![STORAGE_KEY.to_string(), "tenant".to_string(), "absent".to_string()];
        let result = host.run_command("alpha", "lookup", &args).await.unwrap();
        assert_eq!(
            result.data(),
            &json!({"found": {"storage": true, "tenant": true, "absent": false}})
        );

        let store = host.context("inspect").get::<MemoryStore>(STORAGE_KEY).unwrap();
        assert_eq!(store.label, "tasks");
    }

    #[tokio::test]
    async fn test_host_keys_win_over_seeded_values() {
        let host = Host::builder()
            .with_value(EVENT_BUS_KEY, "not a bus")
            .build()
            .unwrap();

        let bus = host.context("inspect").get::<EventBus>(EVENT_BUS_KEY).unwrap();
        assert!(Arc::ptr_eq(&bus, host.event_bus()));
    }

    #[tokio::test]
    async fn test_enable_publishes_lifecycle_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let bus = Arc::new(EventBus::new());
        for event_type in [EXTENSION_ENABLED, EXTENSION_DISABLED] {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                event_type,
                handler("recorder", move |_ctx, event: Event| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.lock().push((
                            event.event_type().to_string(),
                            event.source().to_string(),
                            event.data()["name"].clone(),
                        ));
                        Ok(())
                    }
                }),
            )
            .unwrap();
        }

        let host = Host::builder()
            .with_event_bus(bus)
            .add_extension(RecordingExtension::new("alpha"))
            .build()
            .unwrap();

        host.enable("alpha").await.unwrap();
        host.disable("alpha").await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, EXTENSION_ENABLED);
        assert_eq!(seen[0].1, "host");
        assert_eq!(seen[0].2, json!("alpha"));
        assert_eq!(seen[1].0, EXTENSION_DISABLED);
    }

    #[tokio::test]
    async fn test_subscribed_extension_receives_events_only_when_enabled() {
        let watcher = Arc::new(RecordingExtension::new("watcher").subscribed_to(EXTENSION_ENABLED));
        let host = Host::builder()
            .add_shared_extension(watcher.clone())
            .add_extension(RecordingExtension::new("alpha"))
            .add_extension(RecordingExtension::new("beta"))
            .build()
            .unwrap();
        assert_eq!(host.event_bus().handler_count(EXTENSION_ENABLED), 1);

        host.enable("alpha").await.unwrap();
        assert_eq!(watcher.events_seen(), 0);

        host.enable("watcher").await.unwrap();
        host.enable("beta").await.unwrap();
        // Its own enabled event plus beta's.
        assert_eq!(watcher.events_seen(), 2);
    }

    #[tokio::test]
    async fn test_failed_enable_publishes_nothing() {
        let watcher = Arc::new(RecordingExtension::new("watcher").subscribed_to(EXTENSION_ENABLED));
        let host = Host::builder()
            .add_extension(RecordingExtension::new("broken").failing_enable())
            .add_shared_extension(watcher.clone())
            .build()
            .unwrap();
        host.enable("watcher").await.unwrap();
        assert_eq!(watcher.events_seen(), 1);

        let err = host.enable("broken").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HookFailed);
        assert!(!host.registry().is_enabled("broken"));
        assert_eq!(watcher.events_seen(), 1);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_undo_enable() {
        let bus = Arc::new(EventBus::new());
        bus.subscribe(
            EXTENSION_ENABLED,
            handler("grumpy", |_ctx, _event: Event| async {
                Err(RuntimeError::Other("no".to_string()))
            }),
        )
        .unwrap();
        let host = Host::builder()
            .with_event_bus(bus)
            .add_extension(RecordingExtension::new("alpha"))
            .build()
            .unwrap();

        let err = host.enable("alpha").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandlerFailed);
        assert!(host.registry().is_enabled("alpha"));
    }

    #[tokio::test]
    async fn test_enable_configured_fails_fast() {
        let settings = Settings::default();
        settings.set("extensions_enabled", vec!["alpha", "ghost", "beta"]);

        let host = Host::builder()
            .with_settings(settings)
            .add_extension(RecordingExtension::new("alpha"))
            .add_extension(RecordingExtension::new("beta"))
            .build()
            .unwrap();

        let err = host.enable_configured().await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(ref name) if name == "ghost"));
        assert!(host.registry().is_enabled("alpha"));
        assert!(!host.registry().is_enabled("beta"));
    }

    #[tokio::test]
    async fn test_run_command() {
        let host = Host::builder()
            .add_extension(RecordingExtension::new("alpha"))
            .build()
            .unwrap();

        let args = vec!["x".to_string()];
        let err = host.run_command("alpha", "echo", &args).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEnabled);

        host.enable("alpha").await.unwrap();
        let result = host.run_command("alpha", "echo", &args).await.unwrap();
        assert_eq!(result.data(), &json!({"args": ["x"]}));
    }

    #[tokio::test]
    async fn test_shutdown_disables_and_cancels() {
        let ext = Arc::new(RecordingExtension::new("alpha"));
        let host = Host::builder()
            .add_shared_extension(ext.clone())
            .add_extension(RecordingExtension::new("beta").failing_disable())
            .build()
            .unwrap();
        host.enable("alpha").await.unwrap();
        host.enable("beta").await.unwrap();

        let ctx = host.context("long-running");
        let err = host.shutdown().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::HookFailed);
        assert!(!host.registry().is_enabled("alpha"));
        assert_eq!(ext.disable_calls(), 1);
        assert!(host.registry().is_enabled("beta"));
        assert!(ctx.is_done());
    }
}
