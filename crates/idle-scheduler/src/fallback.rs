//! Timer-based stand-in for hosts without a native idle primitive.
//!
//! Each request sleeps for the retry delay, then hands the callback a synthetic
//! [`FixedDeadline`]. The remaining time it reports is a constant, not a measurement.

use idle_types::{
    FixedDeadline, IdleCallback, IdlePort, IdleRequestId, FALLBACK_TIME_REMAINING,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

pub struct TimerFallbackPort {
    period: Duration,
    time_remaining: Duration,
    live: Arc<Mutex<HashSet<u64>>>,
    next_id: AtomicU64,
    runtime: Option<Handle>,
}

impl TimerFallbackPort {
    /// Fire each request after `period`. Captures the current tokio runtime, if any, so
    /// requests made from outside the runtime still get scheduled.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            time_remaining: FALLBACK_TIME_REMAINING,
            live: Arc::new(Mutex::new(HashSet::new())),
            next_id: AtomicU64::new(1),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_time_remaining(mut self, remaining: Duration) -> Self {
        self.time_remaining = remaining;
        self
    }

    pub fn pending_requests(&self) -> usize {
        self.live.lock().len()
    }
}

impl IdlePort for TimerFallbackPort {
    fn supports_idle_callback(&self) -> bool {
        false
    }

    fn request_idle(&self, callback: IdleCallback) -> IdleRequestId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let Some(runtime) = Handle::try_current().ok().or_else(|| self.runtime.clone()) else {
            tracing::error!(request = id, "no tokio runtime; fallback idle request dropped");
            return IdleRequestId(id);
        };
        self.live.lock().insert(id);
        let live = Arc::clone(&self.live);
        let period = self.period;
        let remaining = self.time_remaining;
        runtime.spawn(async move {
            tokio::time::sleep(period).await;
            if !live.lock().remove(&id) {
                return;
            }
            tracing::trace!(request = id, "fallback idle slot");
            callback(Box::new(FixedDeadline::new(remaining))).await;
        });
        IdleRequestId(id)
    }

    fn cancel_idle(&self, id: IdleRequestId) {
        self.live.lock().remove(&id.0);
    }
}
