//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::{CommandResult, CommandSpec, Event, ExecutionContext, Extension, ExtensionMetadata};
use crate::error::{Result, RuntimeError};

/// Extension that records hook calls and can be told to fail them.
pub(crate) struct RecordingExtension {
    name: String,
    enabled: AtomicBool,
    fail_enable: AtomicBool,
    fail_disable: AtomicBool,
    hook_delay: Option<Duration>,
    ignore_context: bool,
    subscriptions: Vec<String>,
    enable_calls: AtomicUsize,
    disable_calls: AtomicUsize,
    events_seen: AtomicUsize,
}

impl RecordingExtension {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: AtomicBool::new(false),
            fail_enable: AtomicBool::new(false),
            fail_disable: AtomicBool::new(false),
            hook_delay: None,
            ignore_context: false,
            subscriptions: Vec::new(),
            enable_calls: AtomicUsize::new(0),
            disable_calls: AtomicUsize::new(0),
            events_seen: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing_enable(self) -> Self {
        self.fail_enable.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn failing_disable(self) -> Self {
        self.fail_disable.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_hook_delay(mut self, delay: Duration) -> Self {
        self.hook_delay = Some(delay);
        self
    }

    /// Hooks flip the state first, then sit out the delay without looking
    /// at their context.
    pub(crate) fn ignoring_context(mut self) -> Self {
        self.ignore_context = true;
        self
    }

    pub(crate) fn subscribed_to(mut self, event_type: &str) -> Self {
        self.subscriptions.push(event_type.to_string());
        self
    }

    pub(crate) fn set_fail_enable(&self, fail: bool) {
        self.fail_enable.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn enable_calls(&self) -> usize {
        self.enable_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn disable_calls(&self) -> usize {
        self.disable_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn events_seen(&self) -> usize {
        self.events_seen.load(Ordering::SeqCst)
    }

    async fn delay(&self, ctx: &ExecutionContext) -> Result<()> {
        let Some(delay) = self.hook_delay else {
            return Ok(());
        };
        if self.ignore_context {
            tokio::time::sleep(delay).await;
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            cause = ctx.done() => Err(RuntimeError::Context(cause)),
        }
    }
}

#[async_trait]
impl Extension for RecordingExtension {
    fn metadata(&self) -> ExtensionMetadata {
        ExtensionMetadata::new(self.name.clone(), "0.1.0").with_author("tests")
    }

    async fn enable(&self, ctx: &ExecutionContext) -> Result<()> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        if self.ignore_context {
            self.enabled.store(true, Ordering::SeqCst);
            return self.delay(ctx).await;
        }
        self.delay(ctx).await?;
        if self.fail_enable.load(Ordering::SeqCst) {
            return Err(RuntimeError::Extension(format!("{} refused to enable", self.name)));
        }
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disable(&self, ctx: &ExecutionContext) -> Result<()> {
        self.disable_calls.fetch_add(1, Ordering::SeqCst);
        if self.ignore_context {
            self.enabled.store(false, Ordering::SeqCst);
            return self.delay(ctx).await;
        }
        self.delay(ctx).await?;
        if self.fail_disable.load(Ordering::SeqCst) {
            return Err(RuntimeError::Extension(format!("{} refused to disable", self.name)));
        }
        self.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("echo", "Echo the arguments back").with_usage("echo [args...]"),
            CommandSpec::new("lookup", "Report which context values are visible")
                .with_usage("lookup <key>..."),
        ]
    }

    async fn handle_command(
        &self,
        ctx: &ExecutionContext,
        command: &str,
        args: &[String],
    ) -> Result<CommandResult> {
        match command {
            "echo" => Ok(CommandResult::success(json!({ "args": args }))),
            "lookup" => {
                let found: serde_json::Map<String, serde_json::Value> = args
                    .iter()
                    .map(|key| (key.clone(), json!(ctx.contains(key))))
                    .collect();
                Ok(CommandResult::success(json!({ "found": found })))
            }
            other => Ok(CommandResult::failure(RuntimeError::UnknownCommand(other.to_string()))),
        }
    }

    async fn on_event(&self, _ctx: &ExecutionContext, _event: &Event) -> Result<()> {
        self.events_seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.clone()
    }
}
