//! Task, status and classification data types.

use crate::{FnProcessor, SchedulerState, TaskError, TaskProcessor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Side-effect hook invoked with a processor's failure.
pub type ErrorHook = Arc<dyn Fn(&TaskError) + Send + Sync>;

/// A unit of deferrable work.
///
/// Lower `priority` runs first; equal priorities keep insertion order. `estimated_duration`
/// only decides whether a task is *started* in a given idle slot, it is never enforced.
#[derive(Clone)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub estimated_duration: Duration,
    pub processor: Arc<dyn TaskProcessor>,
    pub on_error: Option<ErrorHook>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        priority: i32,
        estimated_duration: Duration,
        processor: impl TaskProcessor + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority,
            estimated_duration,
            processor: Arc::new(processor),
            on_error: None,
        }
    }

    /// Build a task from an async closure.
    pub fn from_fn<F, Fut>(
        id: impl Into<String>,
        name: impl Into<String>,
        priority: i32,
        estimated_duration: Duration,
        f: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self::new(id, name, priority, estimated_duration, FnProcessor(f))
    }

    pub fn with_on_error(mut self, hook: impl Fn(&TaskError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("estimated_duration", &self.estimated_duration)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Lifetime counters of one scheduler instance. Only re-construction resets them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub tasks_completed: u64,
    /// Evaluations where the head task did not fit the remaining idle time.
    pub tasks_skipped: u64,
    pub tasks_failed: u64,
    /// Wall time spent inside processors (performance monitoring only).
    pub total_processing_time_ms: f64,
    /// Running mean of the idle time reported at the start of each slot (performance
    /// monitoring only).
    pub average_idle_time_ms: f64,
    pub idle_slots: u64,
    pub tab_visibility_changes: u64,
    pub starvation_warnings: u64,
}

impl SchedulerStats {
    /// Count a granted slot and fold its reported idle time into the running mean.
    pub fn record_idle_slot(&mut self, granted: Duration, monitor: bool) {
        self.idle_slots += 1;
        if monitor {
            let sample = granted.as_secs_f64() * 1000.0;
            self.average_idle_time_ms +=
                (sample - self.average_idle_time_ms) / self.idle_slots as f64;
        }
    }

    pub fn record_completion(&mut self, elapsed: Option<Duration>) {
        self.tasks_completed += 1;
        if let Some(d) = elapsed {
            self.total_processing_time_ms += d.as_secs_f64() * 1000.0;
        }
    }
}

/// Read-only snapshot returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub queue_length: usize,
    pub is_tab_visible: bool,
    pub stats: SchedulerStats,
}

/// Tier assigned by the work classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    /// Needed for the application to function at all; handle synchronously.
    Critical,
    /// The open or most recent record; handle synchronously.
    Important,
    /// Archival data; safe to defer to the idle-time scheduler.
    Background,
}

impl PriorityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            PriorityTier::Critical => "critical",
            PriorityTier::Important => "important",
            PriorityTier::Background => "background",
        }
    }

    pub fn is_deferrable(self) -> bool {
        matches!(self, PriorityTier::Background)
    }
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller knows about a stored record. Every field is optional; `as_of` is the
/// reference time recency is measured against, so classification stays deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageMetadata {
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_active: bool,
}

/// Classifier output for one storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub key: String,
    pub priority: PriorityTier,
    pub estimated_size: u64,
    pub reasoning: String,
}

impl Classification {
    /// Duration estimate for processing this record at `bytes_per_ms` throughput (at least 1 ms).
    pub fn estimated_duration(&self, bytes_per_ms: u64) -> Duration {
        let ms = self.estimated_size.div_ceil(bytes_per_ms.max(1));
        Duration::from_millis(ms.max(1))
    }
}
