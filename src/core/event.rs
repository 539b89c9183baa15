//! Event system

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::core::context::ExecutionContext;
use crate::core::extension::Extension;
use crate::error::{Result, RuntimeError};

/// Event type published by the host after an extension is enabled.
pub const EXTENSION_ENABLED: &str = "extension.enabled";
/// Event type published by the host after an extension is disabled.
pub const EXTENSION_DISABLED: &str = "extension.disabled";

/// Typed, timestamped notification.
///
/// Fields are read-only once built; every handler receives its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    event_type: String,
    source: String,
    timestamp: DateTime<Utc>,
    data: Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            data: Value::Null,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Decodes the payload into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Event handler trait
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: &ExecutionContext, event: Event) -> Result<()>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

pub struct ClosureHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for ClosureHandler<F>
where
    F: Fn(ExecutionContext, Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, ctx: &ExecutionContext, event: Event) -> Result<()> {
        (self.f)(ctx.clone(), event).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub fn handler<F, Fut>(name: impl Into<String>, f: F) -> ClosureHandler<F>
where
    F: Fn(ExecutionContext, Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    ClosureHandler {
        name: name.into(),
        f,
    }
}

/// Answers whether an extension is currently enabled.
///
/// Implemented by the registry, which owns the enabled flags.
pub trait EnabledLookup: Send + Sync {
    fn is_enabled(&self, name: &str) -> bool;
}

/// Delivers events to an extension's `on_event` hook while the registry
/// reports it enabled.
pub struct ExtensionHandler {
    name: String,
    extension: Arc<dyn Extension>,
    enabled: Arc<dyn EnabledLookup>,
}

impl ExtensionHandler {
    pub fn new(extension: Arc<dyn Extension>, enabled: Arc<dyn EnabledLookup>) -> Self {
        Self {
            name: extension.name(),
            extension,
            enabled,
        }
    }
}

#[async_trait]
impl EventHandler for ExtensionHandler {
    async fn handle(&self, ctx: &ExecutionContext, event: Event) -> Result<()> {
        if !self.enabled.is_enabled(&self.name) {
            return Ok(());
        }
        self.extension.on_event(ctx, &event).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Type-keyed publish/subscribe dispatcher.
///
/// Dispatch is sequential, in subscription order, on the publisher's task.
/// The first failing handler stops the fan-out and its error goes back to
/// the publisher; handlers that already ran are not rolled back.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, ctx: &ExecutionContext, event: Event) -> Result<()> {
        // Snapshot so the lock is not held across handler awaits. A handler
        // subscribed mid-publish is not part of this fan-out.
        let handlers = self.handlers.read().get(event.event_type()).cloned();
        let Some(handlers) = handlers else {
            return Ok(());
        };

        tracing::debug!(
            event_type = event.event_type(),
            source = event.source(),
            handlers = handlers.len(),
            "publishing event"
        );

        for handler in &handlers {
            if let Err(source) = handler.handle(ctx, event.clone()).await {
                return Err(RuntimeError::HandlerFailed {
                    event_type: event.event_type().to_string(),
                    handler: handler.name().to_string(),
                    source: Box::new(source),
                });
            }
        }

        Ok(())
    }

    pub fn subscribe<H: EventHandler + 'static>(
        &self,
        event_type: impl Into<String>,
        handler: H,
    ) -> Result<()> {
        self.subscribe_shared(event_type, Arc::new(handler))
    }

    pub fn subscribe_shared(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        let event_type = event_type.into();
        tracing::debug!(event_type = %event_type, handler = handler.name(), "handler subscribed");
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .push(handler);
        Ok(())
    }

    /// Routes `event_type` to the extension's `on_event`, gated on
    /// `enabled`.
    pub fn subscribe_extension(
        &self,
        event_type: impl Into<String>,
        extension: Arc<dyn Extension>,
        enabled: Arc<dyn EnabledLookup>,
    ) -> Result<()> {
        self.subscribe(event_type, ExtensionHandler::new(extension, enabled))
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    pub fn event_types(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}
