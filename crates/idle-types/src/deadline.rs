//! Concrete [`IdleDeadline`] implementations.

use crate::IdleDeadline;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Reports the same remaining time on every query. Used for the synthetic deadlines of the
/// timer fallback.
#[derive(Debug, Clone, Copy)]
pub struct FixedDeadline {
    remaining: Duration,
    did_timeout: bool,
}

impl FixedDeadline {
    pub fn new(remaining: Duration) -> Self {
        Self {
            remaining,
            did_timeout: false,
        }
    }

    pub fn timed_out(remaining: Duration) -> Self {
        Self {
            remaining,
            did_timeout: true,
        }
    }
}

impl IdleDeadline for FixedDeadline {
    fn time_remaining(&self) -> Duration {
        self.remaining
    }

    fn did_timeout(&self) -> bool {
        self.did_timeout
    }
}

/// A budget that starts draining when the deadline is created (tokio clock).
#[derive(Debug, Clone, Copy)]
pub struct InstantDeadline {
    end: Instant,
}

impl InstantDeadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            end: Instant::now() + budget,
        }
    }
}

impl IdleDeadline for InstantDeadline {
    fn time_remaining(&self) -> Duration {
        self.end.saturating_duration_since(Instant::now())
    }
}

/// Replays a fixed sequence of remaining-time readings, one per query; the last reading
/// repeats once the sequence is exhausted. An empty script always reports zero.
#[derive(Debug)]
pub struct ScriptedDeadline {
    readings: Vec<Duration>,
    cursor: AtomicUsize,
}

impl ScriptedDeadline {
    pub fn new(readings: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn from_millis(readings: &[u64]) -> Self {
        Self::new(readings.iter().copied().map(Duration::from_millis))
    }

    /// Number of `time_remaining` queries answered so far.
    pub fn queries(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

impl IdleDeadline for ScriptedDeadline {
    fn time_remaining(&self) -> Duration {
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        match self.readings.len() {
            0 => Duration::ZERO,
            n => self.readings[i.min(n - 1)],
        }
    }
}
