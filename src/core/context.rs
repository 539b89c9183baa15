//! Execution context: one cancellation scope plus request-scoped data

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ContextError, Result, RuntimeError};

type Value = Arc<dyn Any + Send + Sync>;

/// Cancellable, optionally deadline-bound unit of execution state.
///
/// Cloning is cheap and yields a handle to the same scope. Once the scope has
/// fired (cancel or deadline, whichever comes first) it stays fired and
/// [`err`](Self::err) keeps returning the first cause.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    parent: Option<ExecutionContext>,
    deadline: Option<Instant>,
    state: watch::Sender<Option<ContextError>>,
    values: RwLock<HashMap<String, Value>>,
    metadata: RwLock<HashMap<String, String>>,
}

impl ExecutionContext {
    fn new(parent: Option<&ExecutionContext>, deadline: Option<Instant>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            inner: Arc::new(ContextInner {
                parent: parent.cloned(),
                deadline,
                state,
                values: RwLock::new(HashMap::new()),
                metadata: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Root context with no deadline. It only fires if cancelled explicitly.
    pub fn background() -> Self {
        Self::new(None, None)
    }

    /// Derives a context that expires `timeout` from now.
    ///
    /// Without a parent the context is a fresh root. Cancelling the parent
    /// cancels the child; the reverse does not hold.
    pub fn with_timeout(parent: Option<&ExecutionContext>, timeout: Duration) -> Self {
        Self::new(parent, Instant::now().checked_add(timeout))
    }

    /// Derives a context that only fires on manual cancellation (or when the
    /// parent fires).
    pub fn with_cancel(parent: Option<&ExecutionContext>) -> Self {
        Self::new(parent, None)
    }

    pub fn parent(&self) -> Option<&ExecutionContext> {
        self.inner.parent.as_ref()
    }

    /// Earliest deadline of this context and its ancestors.
    pub fn deadline(&self) -> Option<Instant> {
        let inherited = self.inner.parent.as_ref().and_then(ExecutionContext::deadline);
        match (self.inner.deadline, inherited) {
            (Some(own), Some(parent)) => Some(own.min(parent)),
            (own, parent) => own.or(parent),
        }
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.set_shared(key, Arc::new(value));
    }

    /// Stores an already shared handle without re-wrapping it.
    pub fn set_shared<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: Arc<T>) {
        self.inner.values.write().insert(key.into(), value);
    }

    /// Looks `key` up here, then in the ancestors. `None` when the key is
    /// absent or holds a value of another type.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let local = self.inner.values.read().get(key).cloned();
        match local {
            Some(value) => value.downcast::<T>().ok(),
            None => self.inner.parent.as_ref().and_then(|parent| parent.get(key)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.values.read().contains_key(key)
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(|parent| parent.contains(key))
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.metadata.write().insert(key.into(), value.into());
    }

    pub fn get_metadata(&self, key: &str) -> Option<String> {
        let local = self.inner.metadata.read().get(key).cloned();
        local.or_else(|| {
            self.inner
                .parent
                .as_ref()
                .and_then(|parent| parent.get_metadata(key))
        })
    }

    /// Idempotent. Has no effect once the context has fired for any reason.
    pub fn cancel(&self) {
        if self.err().is_none() {
            self.settle(ContextError::Canceled);
        }
    }

    /// `None` while active, the cause once fired.
    pub fn err(&self) -> Option<ContextError> {
        let current = *self.inner.state.borrow();
        if current.is_some() {
            return current;
        }

        let cause = self
            .inner
            .parent
            .as_ref()
            .and_then(ExecutionContext::err)
            .or_else(|| {
                self.inner
                    .deadline
                    .filter(|deadline| Instant::now() >= *deadline)
                    .map(|_| ContextError::DeadlineExceeded)
            })?;

        self.settle(cause);
        *self.inner.state.borrow()
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Cooperative cancellation check for long-running work.
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(cause) => Err(RuntimeError::Context(cause)),
            None => Ok(()),
        }
    }

    /// Resolves once the context fires and yields the cause.
    pub fn done(&self) -> Pin<Box<dyn Future<Output = ContextError> + Send + '_>> {
        Box::pin(async move {
            let mut changes = self.inner.state.subscribe();
            loop {
                if let Some(cause) = self.err() {
                    return cause;
                }

                tokio::select! {
                    _ = changes.changed() => {}
                    _ = sleep_until(self.inner.deadline) => {}
                    _ = parent_done(self.inner.parent.as_ref()) => {}
                }
            }
        })
    }

    // First cause wins; later calls are no-ops.
    fn settle(&self, cause: ContextError) {
        self.inner.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(cause);
            true
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn parent_done(parent: Option<&ExecutionContext>) {
    match parent {
        Some(parent) => {
            parent.done().await;
        }
        None => std::future::pending().await,
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("deadline", &self.inner.deadline)
            .field("err", &*self.inner.state.borrow())
            .field("has_parent", &self.inner.parent.is_some())
            .field("metadata", &*self.inner.metadata.read())
            .finish_non_exhaustive()
    }
}

/// Builds a context with its parent, bound and seed data in one expression.
#[derive(Default)]
pub struct ContextBuilder {
    parent: Option<ExecutionContext>,
    timeout: Option<Duration>,
    values: Vec<(String, Value)>,
    metadata: Vec<(String, String)>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(mut self, parent: &ExecutionContext) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_value<T: Send + Sync + 'static>(mut self, key: impl Into<String>, value: T) -> Self {
        self.values.push((key.into(), Arc::new(value)));
        self
    }

    pub fn with_shared<T: Send + Sync + 'static>(mut self, key: impl Into<String>, value: Arc<T>) -> Self {
        self.values.push((key.into(), value));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    pub fn build(self) -> ExecutionContext {
        let parent = self.parent.as_ref();
        let ctx = match self.timeout {
            Some(timeout) => ExecutionContext::with_timeout(parent, timeout),
            None => ExecutionContext::with_cancel(parent),
        };

        ctx.inner.values.write().extend(self.values);
        ctx.inner.metadata.write().extend(self.metadata);
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_and_metadata() {
        let ctx = ExecutionContext::with_timeout(None, Duration::from_secs(5));

        ctx.set("test_key", "test_value".to_string());
        let value = ctx.get::<String>("test_key");
        assert_eq!(value.as_deref().map(String::as_str), Some("test_value"));
        assert!(ctx.get::<i32>("test_key").is_none());
        assert!(ctx.get::<String>("missing").is_none());

        ctx.set_metadata("user", "testuser");
        assert_eq!(ctx.get_metadata("user").as_deref(), Some("testuser"));
        // Separate stores: a metadata key is not a value key.
        assert!(!ctx.contains("user"));
    }

    #[test]
    fn test_not_done_before_cancel() {
        let ctx = ExecutionContext::with_cancel(None);
        assert!(!ctx.is_done());
        assert!(ctx.err().is_none());
        assert!(ctx.check().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_fires_done_permanently() {
        let ctx = ExecutionContext::with_timeout(None, Duration::from_secs(5));
        ctx.cancel();

        assert_eq!(ctx.done().await, ContextError::Canceled);
        assert_eq!(ctx.err(), Some(ContextError::Canceled));

        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
        assert!(matches!(
            ctx.check(),
            Err(RuntimeError::Context(ContextError::Canceled))
        ));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = ExecutionContext::with_timeout(None, Duration::from_millis(20));
        assert!(ctx.err().is_none());

        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));

        // Cancelling after expiry keeps the original cause.
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_done_wakes_waiter_on_cancel() {
        let ctx = ExecutionContext::with_cancel(None);
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.done().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        ctx.cancel();
        let cause = waiter.await.unwrap();
        assert_eq!(cause, ContextError::Canceled);
    }

    #[tokio::test]
    async fn test_parent_cancel_propagates_to_child() {
        let parent = ExecutionContext::with_cancel(None);
        let child = ExecutionContext::with_timeout(Some(&parent), Duration::from_secs(5));
        let sibling = ExecutionContext::with_cancel(Some(&parent));

        sibling.cancel();
        assert!(parent.err().is_none());
        assert!(child.err().is_none());

        parent.cancel();
        assert_eq!(child.done().await, ContextError::Canceled);
        assert_eq!(child.err(), Some(ContextError::Canceled));
    }

    #[tokio::test]
    async fn test_parent_deadline_bounds_child() {
        let parent = ExecutionContext::with_timeout(None, Duration::from_millis(20));
        let child = ExecutionContext::with_timeout(Some(&parent), Duration::from_secs(60));

        assert_eq!(child.deadline(), parent.deadline());
        assert_eq!(child.done().await, ContextError::DeadlineExceeded);
    }

    #[test]
    fn test_lookups_fall_back_to_parent() {
        let parent = ExecutionContext::background();
        parent.set("settings", 42_u32);
        parent.set_metadata("operation", "root");

        let child = ExecutionContext::with_cancel(Some(&parent));
        child.set_metadata("operation", "child");

        assert_eq!(child.get::<u32>("settings").as_deref(), Some(&42));
        assert_eq!(child.get_metadata("operation").as_deref(), Some("child"));
        assert_eq!(parent.get_metadata("operation").as_deref(), Some("root"));
    }

    #[test]
    fn test_concurrent_access() {
        let ctx = ExecutionContext::background();
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        ctx.set(format!("k{}-{}", i, j), j);
                        ctx.set_metadata(format!("m{}", i), j.to_string());
                        assert_eq!(ctx.get::<i32>(&format!("k{}-{}", i, j)).as_deref(), Some(&j));
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(ctx.get_metadata("m3").as_deref(), Some("99"));
    }

    #[test]
    fn test_context_builder() {
        let parent = ExecutionContext::background();
        let ctx = ContextBuilder::new()
            .with_parent(&parent)
            .with_timeout(Duration::from_secs(1))
            .with_value("retries", 3_i64)
            .with_metadata("operation", "test")
            .build();

        assert!(ctx.deadline().is_some());
        assert_eq!(ctx.get::<i64>("retries").as_deref(), Some(&3));
        assert_eq!(ctx.get_metadata("operation").as_deref(), Some("test"));

        parent.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }
}
