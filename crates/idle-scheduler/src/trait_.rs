//! Scheduler trait: enqueue, cancel, pause/resume, status.

use idle_types::{SchedulerError, SchedulerStatus, Task};

/// Background scheduler for deferred, low-priority work.
///
/// Contract: no method panics or surfaces a task's failure. `add_task` is the only fallible
/// operation and only rejects the input (duplicate id, scheduler shut down); every other
/// operation on an unknown id or after `cleanup` is a benign no-op.
pub trait TaskScheduler: Send + Sync {
    /// Queue a task in priority order. Starts processing when the scheduler was idle.
    fn add_task(&self, task: Task) -> Result<(), SchedulerError>;

    /// Remove a queued task. Returns false when no queued task has this id; a task that is
    /// already executing is not interrupted.
    fn remove_task(&self, id: &str) -> bool;

    fn start_processing(&self);

    /// Cancel the outstanding idle request and keep the queue.
    fn pause_processing(&self);

    fn resume_processing(&self);

    /// Cancel the outstanding idle request and drop every queued task.
    fn stop_processing(&self);

    /// Snapshot of state, queue length, visibility and statistics.
    fn get_status(&self) -> SchedulerStatus;

    /// Whether a native idle primitive drives this scheduler (false means timer fallback).
    fn supports_idle_callback(&self) -> bool;

    /// Queued ids in execution order.
    fn queued_task_ids(&self) -> Vec<String>;

    /// Idempotent teardown: cancel requests, clear the queue, drop visibility subscriptions.
    fn cleanup(&self);
}
