//! Extension capability contract and command model

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::context::ExecutionContext;
use crate::core::event::Event;
use crate::error::{Result, RuntimeError};

/// Identity of an extension.
///
/// `dependencies` is advisory: the runtime records it but does not resolve or
/// order extensions by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub dependencies: Vec<String>,
}

impl ExtensionMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<impl Into<String>>) -> Self {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }
}

/// Descriptor of one command an extension exposes. Metadata only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub usage: String,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            usage: String::new(),
        }
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }
}

/// Outcome of a command invocation.
///
/// A failed result always carries an error; a successful one never does.
/// Data may accompany either.
#[derive(Debug)]
pub struct CommandResult {
    success: bool,
    data: Value,
    error: Option<RuntimeError>,
    render_hint: Option<String>,
}

impl CommandResult {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            render_hint: None,
        }
    }

    pub fn empty() -> Self {
        Self::success(Value::Null)
    }

    pub fn failure(error: RuntimeError) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error),
            render_hint: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_render_hint(mut self, hint: impl Into<String>) -> Self {
        self.render_hint = Some(hint.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn error(&self) -> Option<&RuntimeError> {
        self.error.as_ref()
    }

    pub fn render_hint(&self) -> Option<&str> {
        self.render_hint.as_deref()
    }

    /// Collapses the result into the data on success or the error on failure.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

/// Renderable handle an extension may expose to an interactive front end.
pub trait ExtensionUi: Send + Sync {
    fn render(&self) -> String;
}

/// Pluggable capability module.
///
/// Hooks take `&self`: the registry shares one instance between callers, so
/// implementations keep their own state behind interior mutability.
#[async_trait]
pub trait Extension: Send + Sync + 'static {
    fn metadata(&self) -> ExtensionMetadata;

    fn name(&self) -> String {
        self.metadata().name
    }

    fn version(&self) -> String {
        self.metadata().version
    }

    fn description(&self) -> String {
        self.metadata().description
    }

    fn author(&self) -> String {
        self.metadata().author
    }

    fn dependencies(&self) -> Vec<String> {
        self.metadata().dependencies
    }

    async fn enable(&self, ctx: &ExecutionContext) -> Result<()>;

    async fn disable(&self, ctx: &ExecutionContext) -> Result<()>;

    fn is_enabled(&self) -> bool;

    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    async fn handle_command(
        &self,
        ctx: &ExecutionContext,
        command: &str,
        args: &[String],
    ) -> Result<CommandResult>;

    async fn on_event(&self, _ctx: &ExecutionContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    /// Event types the host should deliver to [`on_event`](Self::on_event).
    fn subscriptions(&self) -> Vec<String> {
        Vec::new()
    }

    fn ui(&self) -> Option<&dyn ExtensionUi> {
        None
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionStatus {
    #[serde(flatten)]
    pub metadata: ExtensionMetadata,
    pub enabled: bool,
}
