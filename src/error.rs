//! Error handling system

use std::fmt;
use thiserror::Error;

/// Why an [`ExecutionContext`](crate::core::ExecutionContext) stopped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Lifecycle hook that an extension runs during a registry transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleHook {
    Enable,
    Disable,
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enable => f.write_str("enable"),
            Self::Disable => f.write_str("disable"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("extension already registered: {0}")]
    AlreadyRegistered(String),

    #[error("extension not found: {0}")]
    NotFound(String),

    #[error("extension not enabled: {0}")]
    NotEnabled(String),

    #[error("{hook} hook failed for extension {extension}: {source}")]
    HookFailed {
        extension: String,
        hook: LifecycleHook,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("handler {handler} failed for event {event_type}: {source}")]
    HandlerFailed {
        event_type: String,
        handler: String,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("extension error: {0}")]
    Extension(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Coarse classification of a [`RuntimeError`], used by hosts to branch on
/// failures without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyRegistered,
    NotFound,
    NotEnabled,
    HookFailed,
    HandlerFailed,
    Canceled,
    DeadlineExceeded,
    UnknownCommand,
    Extension,
    Config,
    Io,
    Other,
}

impl ErrorKind {
    /// Process exit code a CLI host reports for this kind.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::NotFound | Self::UnknownCommand => 2,
            Self::NotEnabled => 3,
            Self::AlreadyRegistered => 4,
            Self::HookFailed | Self::HandlerFailed => 5,
            Self::Canceled | Self::DeadlineExceeded => 6,
            Self::Config => 7,
            Self::Io => 8,
            Self::Extension | Self::Other => 1,
        }
    }
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRegistered(_) => ErrorKind::AlreadyRegistered,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotEnabled(_) => ErrorKind::NotEnabled,
            Self::HookFailed { .. } => ErrorKind::HookFailed,
            Self::HandlerFailed { .. } => ErrorKind::HandlerFailed,
            Self::Context(ContextError::Canceled) => ErrorKind::Canceled,
            Self::Context(ContextError::DeadlineExceeded) => ErrorKind::DeadlineExceeded,
            Self::UnknownCommand(_) => ErrorKind::UnknownCommand,
            Self::Extension(_) => ErrorKind::Extension,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Other(_) | Self::Internal(_) => ErrorKind::Other,
        }
    }

    /// The error returned by the failing hook or handler, untouched.
    ///
    /// Returns `None` for errors that do not wrap a lower-level failure.
    pub fn cause(&self) -> Option<&RuntimeError> {
        match self {
            Self::HookFailed { source, .. } | Self::HandlerFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    pub(crate) fn hook_failed(extension: &str, hook: LifecycleHook, source: RuntimeError) -> Self {
        Self::HookFailed {
            extension: extension.to_string(),
            hook,
            source: Box::new(source),
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(error: std::io::Error) -> Self {
        RuntimeError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(error: serde_json::Error) -> Self {
        RuntimeError::Other(format!("payload error: {}", error))
    }
}
