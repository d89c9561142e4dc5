//! Idle port driven by the embedding host: whoever owns the main loop calls `grant` when it
//! has spare time.

use idle_types::{IdleCallback, IdleDeadline, IdlePort, IdleRequestId, InstantDeadline};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Idle port whose opportunities are handed out explicitly by the host.
///
/// Requests are served oldest first. `grant` resolves once the slot's work is done, which also
/// makes this port a deterministic driver for tests.
pub struct HostIdlePort {
    pending: Mutex<BTreeMap<u64, IdleCallback>>,
    next_id: AtomicU64,
    native: bool,
}

impl HostIdlePort {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            native: true,
        }
    }

    /// A port that reports no native idle primitive; schedulers given this port fall back to
    /// their timer loop.
    pub fn unsupported() -> Self {
        Self {
            native: false,
            ..Self::new()
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    /// Grant an idle window of `budget`, measured from now on the tokio clock. Returns false
    /// when nobody was waiting for one.
    pub async fn grant(&self, budget: Duration) -> bool {
        self.grant_deadline(InstantDeadline::new(budget)).await
    }

    /// Grant an idle window described by `deadline`.
    pub async fn grant_deadline(&self, deadline: impl IdleDeadline + 'static) -> bool {
        let next = self.pending.lock().pop_first();
        match next {
            Some((id, callback)) => {
                tracing::trace!(request = id, "idle window granted");
                callback(Box::new(deadline)).await;
                true
            }
            None => false,
        }
    }
}

impl Default for HostIdlePort {
    fn default() -> Self {
        Self::new()
    }
}

impl IdlePort for HostIdlePort {
    fn supports_idle_callback(&self) -> bool {
        self.native
    }

    fn request_idle(&self, callback: IdleCallback) -> IdleRequestId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().insert(id, callback);
        IdleRequestId(id)
    }

    fn cancel_idle(&self, id: IdleRequestId) {
        self.pending.lock().remove(&id.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idle_types::{FixedDeadline, SlotFuture};
    use std::sync::Arc;

    fn recording(log: Arc<Mutex<Vec<(u64, Duration)>>>, tag: u64) -> IdleCallback {
        Box::new(move |deadline: Box<dyn IdleDeadline>| -> SlotFuture {
            Box::pin(async move {
                log.lock().push((tag, deadline.time_remaining()));
            })
        })
    }

    #[tokio::test]
    async fn serves_requests_oldest_first() {
        let port = HostIdlePort::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        port.request_idle(recording(Arc::clone(&log), 1));
        port.request_idle(recording(Arc::clone(&log), 2));
        assert_eq!(port.pending_requests(), 2);

        assert!(port.grant_deadline(FixedDeadline::new(Duration::from_millis(7))).await);
        assert!(port.grant_deadline(FixedDeadline::new(Duration::from_millis(9))).await);
        assert!(!port.grant(Duration::from_millis(5)).await);

        let log = log.lock().clone();
        assert_eq!(
            log,
            vec![(1, Duration::from_millis(7)), (2, Duration::from_millis(9))]
        );
    }

    #[tokio::test]
    async fn cancelled_request_is_not_granted() {
        let port = HostIdlePort::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = port.request_idle(recording(Arc::clone(&log), 1));
        port.cancel_idle(id);
        assert_eq!(port.pending_requests(), 0);
        assert!(!port.grant(Duration::from_millis(20)).await);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn unsupported_port_reports_no_native_idle() {
        assert!(HostIdlePort::new().supports_idle_callback());
        assert!(!HostIdlePort::unsupported().supports_idle_callback());
    }
}
