//! Visibility ports: a settable hidden/visible signal and a no-op for headless hosts.

use idle_types::{SubscriptionId, VisibilityListener, VisibilityPort};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct SignalState {
    hidden: bool,
    listeners: BTreeMap<u64, VisibilityListener>,
    next_id: u64,
}

/// Hidden/visible flag the host flips; listeners hear about real changes only.
pub struct VisibilitySignal {
    state: Mutex<SignalState>,
}

impl VisibilitySignal {
    pub fn new(hidden: bool) -> Self {
        Self {
            state: Mutex::new(SignalState {
                hidden,
                listeners: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Update the flag. Listeners run synchronously on the caller's thread, after the signal's
    /// own lock is released.
    pub fn set_hidden(&self, hidden: bool) {
        let listeners: Vec<VisibilityListener> = {
            let mut state = self.state.lock();
            if state.hidden == hidden {
                return;
            }
            state.hidden = hidden;
            state.listeners.values().cloned().collect()
        };
        tracing::debug!(hidden, listeners = listeners.len(), "visibility signal changed");
        for listener in listeners {
            listener(hidden);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Mirror a host-owned `watch` channel (`true` = hidden) into this signal until the
    /// sender is dropped.
    pub fn follow(self: &Arc<Self>, mut rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let signal = Arc::clone(self);
        tokio::spawn(async move {
            let initial = *rx.borrow_and_update();
            signal.set_hidden(initial);
            while rx.changed().await.is_ok() {
                let hidden = *rx.borrow_and_update();
                signal.set_hidden(hidden);
            }
        })
    }
}

impl Default for VisibilitySignal {
    fn default() -> Self {
        Self::new(false)
    }
}

impl VisibilityPort for VisibilitySignal {
    fn is_hidden(&self) -> bool {
        self.state.lock().hidden
    }

    fn subscribe(&self, listener: VisibilityListener) -> SubscriptionId {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.insert(id, listener);
        SubscriptionId(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().listeners.remove(&id.0);
    }
}

/// Always visible, never notifies. For hosts without a visibility concept.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVisibility;

impl VisibilityPort for NoopVisibility {
    fn is_hidden(&self) -> bool {
        false
    }

    fn subscribe(&self, _listener: VisibilityListener) -> SubscriptionId {
        SubscriptionId(0)
    }

    fn unsubscribe(&self, _id: SubscriptionId) {}
}
