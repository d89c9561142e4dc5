//! Traits for task processors and the two host ports the scheduler depends on.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// One unit of deferred work. Runs at most once per enqueue; the outcome is only used for
/// bookkeeping and the task's `on_error` hook.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self) -> Result<(), TaskError>;
}

/// Adapter so plain async closures can be used as processors.
pub struct FnProcessor<F>(pub F);

#[async_trait]
impl<F, Fut> TaskProcessor for FnProcessor<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    async fn process(&self) -> Result<(), TaskError> {
        (self.0)().await
    }
}

/// Describes one idle opportunity granted by the host.
///
/// `time_remaining` is re-evaluated on every call; hosts backed by a real clock report less
/// time as the slot is consumed.
pub trait IdleDeadline: Send + Sync {
    fn time_remaining(&self) -> Duration;

    /// True when the opportunity was delivered because a host-side timeout fired rather than
    /// because the host was actually idle.
    fn did_timeout(&self) -> bool {
        false
    }
}

/// Identifier returned by [`IdlePort::request_idle`], used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdleRequestId(pub u64);

/// Future returned by an [`IdleCallback`]; the port drives it to completion.
pub type SlotFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Invoked once by the port when the requested idle opportunity arrives.
pub type IdleCallback = Box<dyn FnOnce(Box<dyn IdleDeadline>) -> SlotFuture + Send + 'static>;

/// Idle-opportunity registration primitive.
///
/// Contract: `request_idle` must not invoke the callback synchronously; when the opportunity
/// arrives the port calls the callback with a deadline and drives the returned future to
/// completion. After `cancel_idle` the callback must not be invoked (a late invocation is
/// tolerated by the scheduler but wasted).
pub trait IdlePort: Send + Sync {
    /// Whether this port is backed by a native idle primitive. When false the scheduler
    /// substitutes its timer fallback.
    fn supports_idle_callback(&self) -> bool {
        true
    }

    fn request_idle(&self, callback: IdleCallback) -> IdleRequestId;

    fn cancel_idle(&self, id: IdleRequestId);
}

/// Identifier returned by [`VisibilityPort::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Called with the new `hidden` value on every visibility change.
pub type VisibilityListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Page/tab visibility signal.
pub trait VisibilityPort: Send + Sync {
    fn is_hidden(&self) -> bool;

    fn subscribe(&self, listener: VisibilityListener) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(msg.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("task already queued or running: {0}")]
    DuplicateTask(String),
    #[error("scheduler has been shut down")]
    ShutDown,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}
