//! Idle-time scheduler: one priority queue drained opportunistically inside host idle slots.
//!
//! All queue and statistics mutation happens under a single short lock that is never held
//! across an await. Processors run one at a time as spawned tokio tasks that the slot awaits,
//! so a processor that panics is reported as a failure and an in-flight processor always
//! runs to completion, even when the scheduler is stopped underneath it.

use crate::fallback::TimerFallbackPort;
use crate::queue::TaskQueue;
use crate::TaskScheduler;
use idle_types::{
    IdleCallback, IdleDeadline, IdlePort, IdleRequestId, SchedulerConfig, SchedulerError,
    SchedulerState, SchedulerStats, SchedulerStatus, SlotFuture, StarvationPolicy,
    SubscriptionId, Task, TaskError, VisibilityPort,
};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outstanding request for the next idle slot.
enum Pending {
    /// Registered with the idle port.
    Slot { ticket: u64, request: IdleRequestId },
    /// Waiting out `idle_retry_delay` before registering.
    Rearm { ticket: u64, timer: AbortHandle },
}

impl Pending {
    fn ticket(&self) -> u64 {
        match self {
            Pending::Slot { ticket, .. } | Pending::Rearm { ticket, .. } => *ticket,
        }
    }
}

struct Inner {
    queue: TaskQueue,
    state: SchedulerState,
    stats: SchedulerStats,
    pending: Option<Pending>,
    next_ticket: u64,
    /// A slot is executing; at most one at a time.
    slot_active: bool,
    /// Id of the task whose processor is in flight.
    running: Option<String>,
    tab_visible: bool,
    paused_by_visibility: bool,
    /// Head task id and how many evaluations in a row skipped it.
    head_skips: Option<(String, u32)>,
    /// Starved task allowed to ignore its estimate (`StarvationPolicy::ForceRun`).
    force_head: Option<String>,
    subscription: Option<SubscriptionId>,
    disposed: bool,
}

struct Shared {
    config: SchedulerConfig,
    port: Arc<dyn IdlePort>,
    native_idle: bool,
    visibility: Option<Arc<dyn VisibilityPort>>,
    inner: Mutex<Inner>,
}

/// Idle-time task scheduler. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct IdleTaskScheduler {
    shared: Arc<Shared>,
}

impl IdleTaskScheduler {
    /// Create a scheduler driven by `idle_port`, or by the timer fallback when no port is given
    /// or the port has no native idle primitive. With `enable_tab_visibility` set, subscribes
    /// to `visibility` for the scheduler's lifetime.
    pub fn new(
        config: SchedulerConfig,
        idle_port: Option<Arc<dyn IdlePort>>,
        visibility: Option<Arc<dyn VisibilityPort>>,
    ) -> Self {
        let native_idle = idle_port
            .as_ref()
            .map(|p| p.supports_idle_callback())
            .unwrap_or(false);
        let port: Arc<dyn IdlePort> = match idle_port {
            Some(p) if native_idle => p,
            _ => {
                info!(
                    retry_delay_ms = config.idle_retry_delay.as_millis() as u64,
                    "native idle callback unavailable, using timer fallback"
                );
                Arc::new(TimerFallbackPort::new(config.idle_retry_delay))
            }
        };
        let visibility = if config.enable_tab_visibility {
            visibility
        } else {
            None
        };
        let tab_visible = visibility.as_ref().map(|v| !v.is_hidden()).unwrap_or(true);

        let shared = Arc::new(Shared {
            config,
            port,
            native_idle,
            visibility,
            inner: Mutex::new(Inner {
                queue: TaskQueue::new(),
                state: SchedulerState::Idle,
                stats: SchedulerStats::default(),
                pending: None,
                next_ticket: 1,
                slot_active: false,
                running: None,
                tab_visible,
                paused_by_visibility: false,
                head_skips: None,
                force_head: None,
                subscription: None,
                disposed: false,
            }),
        });

        if let Some(v) = &shared.visibility {
            let weak = Arc::downgrade(&shared);
            let id = v.subscribe(Arc::new(move |hidden: bool| {
                if let Some(s) = weak.upgrade() {
                    s.on_visibility_change(hidden);
                }
            }));
            shared.inner.lock().subscription = Some(id);
        }

        Self { shared }
    }

    /// Scheduler on the timer fallback with no visibility coupling.
    pub fn with_timer_fallback(config: SchedulerConfig) -> Self {
        Self::new(config, None, None)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Run the execution algorithm against a deadline the caller owns, for hosts that already
    /// have an idle loop. Any outstanding idle request is superseded. Returns false when the
    /// scheduler is not processing or another slot is already running.
    pub async fn run_idle_slot(&self, deadline: &dyn IdleDeadline) -> bool {
        {
            let mut inner = self.shared.inner.lock();
            if !self.shared.claim_slot(&mut inner, None) {
                return false;
            }
        }
        self.shared.drive_slot(deadline).await;
        true
    }
}

impl TaskScheduler for IdleTaskScheduler {
    fn add_task(&self, task: Task) -> Result<(), SchedulerError> {
        let mut inner = self.shared.inner.lock();
        if inner.disposed {
            return Err(SchedulerError::ShutDown);
        }
        if inner.queue.contains(&task.id) || inner.running.as_deref() == Some(task.id.as_str()) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }
        debug!(
            task_id = %task.id,
            name = %task.name,
            priority = task.priority,
            estimated_ms = task.estimated_duration.as_millis() as u64,
            "task queued"
        );
        inner.queue.push(task);
        let state = inner.state;
        match state {
            SchedulerState::Idle => self.shared.begin(&mut inner),
            SchedulerState::Processing => self.shared.arm(&mut inner),
            SchedulerState::Paused => {}
        }
        Ok(())
    }

    fn remove_task(&self, id: &str) -> bool {
        let mut inner = self.shared.inner.lock();
        let removed = inner.queue.remove(id).is_some();
        if removed {
            debug!(task_id = %id, "task removed");
            if inner.head_skips.as_ref().is_some_and(|(h, _)| h == id) {
                inner.head_skips = None;
            }
            if inner.force_head.as_deref() == Some(id) {
                inner.force_head = None;
            }
            if inner.queue.is_empty()
                && inner.state == SchedulerState::Processing
                && !inner.slot_active
            {
                self.shared.cancel_pending(&mut inner);
                self.shared.set_state(&mut inner, SchedulerState::Idle);
            }
        }
        removed
    }

    fn start_processing(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.disposed || inner.queue.is_empty() || inner.state == SchedulerState::Processing {
            return;
        }
        self.shared.begin(&mut inner);
    }

    fn pause_processing(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.disposed {
            return;
        }
        self.shared.cancel_pending(&mut inner);
        inner.paused_by_visibility = false;
        self.shared.set_state(&mut inner, SchedulerState::Paused);
    }

    fn resume_processing(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.disposed {
            return;
        }
        if inner.queue.is_empty() {
            inner.paused_by_visibility = false;
            self.shared.set_state(&mut inner, SchedulerState::Idle);
        } else {
            self.shared.begin(&mut inner);
        }
    }

    fn stop_processing(&self) {
        let mut inner = self.shared.inner.lock();
        self.shared.stop(&mut inner);
    }

    fn get_status(&self) -> SchedulerStatus {
        let inner = self.shared.inner.lock();
        SchedulerStatus {
            state: inner.state,
            queue_length: inner.queue.len(),
            is_tab_visible: inner.tab_visible,
            stats: inner.stats.clone(),
        }
    }

    fn supports_idle_callback(&self) -> bool {
        self.shared.native_idle
    }

    fn queued_task_ids(&self) -> Vec<String> {
        self.shared.inner.lock().queue.ids()
    }

    fn cleanup(&self) {
        let subscription = {
            let mut inner = self.shared.inner.lock();
            if inner.disposed {
                return;
            }
            self.shared.stop(&mut inner);
            inner.disposed = true;
            inner.subscription.take()
        };
        if let (Some(v), Some(id)) = (&self.shared.visibility, subscription) {
            v.unsubscribe(id);
        }
        info!("idle scheduler cleaned up");
    }
}

impl Shared {
    fn set_state(&self, inner: &mut Inner, next: SchedulerState) {
        if inner.state != next {
            info!(from = %inner.state, to = %next, queue = inner.queue.len(), "scheduler state");
            inner.state = next;
        }
    }

    /// Enter `Processing` (or `Paused` while hidden) for a non-empty queue.
    fn begin(self: &Arc<Self>, inner: &mut Inner) {
        if inner.queue.is_empty() {
            self.set_state(inner, SchedulerState::Idle);
            return;
        }
        if !inner.tab_visible {
            self.cancel_pending(inner);
            inner.paused_by_visibility = true;
            self.set_state(inner, SchedulerState::Paused);
            return;
        }
        inner.paused_by_visibility = false;
        self.set_state(inner, SchedulerState::Processing);
        self.arm(inner);
    }

    fn stop(&self, inner: &mut Inner) {
        self.cancel_pending(inner);
        inner.queue.clear();
        inner.head_skips = None;
        inner.force_head = None;
        inner.paused_by_visibility = false;
        self.set_state(inner, SchedulerState::Idle);
    }

    fn take_ticket(inner: &mut Inner) -> u64 {
        let t = inner.next_ticket;
        inner.next_ticket += 1;
        t
    }

    /// Register for the next idle slot unless a request is outstanding or a slot is running.
    fn arm(self: &Arc<Self>, inner: &mut Inner) {
        if inner.disposed || inner.pending.is_some() || inner.slot_active {
            return;
        }
        let ticket = Self::take_ticket(inner);
        let weak = Arc::downgrade(self);
        let callback: IdleCallback = Box::new(move |deadline: Box<dyn IdleDeadline>| -> SlotFuture {
            Box::pin(async move {
                if let Some(shared) = weak.upgrade() {
                    shared.on_idle_slot(ticket, deadline).await;
                }
            })
        });
        let request = self.port.request_idle(callback);
        debug!(ticket, request = request.0, "idle slot requested");
        inner.pending = Some(Pending::Slot { ticket, request });
    }

    /// Register again after `idle_retry_delay`. The fallback port already waits that long per
    /// request, so it is armed directly.
    fn rearm_later(self: &Arc<Self>, inner: &mut Inner) {
        if inner.disposed || inner.pending.is_some() {
            return;
        }
        if !self.native_idle {
            self.arm(inner);
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                self.arm(inner);
                return;
            }
        };
        let ticket = Self::take_ticket(inner);
        let weak = Arc::downgrade(self);
        let delay = self.config.idle_retry_delay;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.on_rearm(ticket);
            }
        });
        inner.pending = Some(Pending::Rearm {
            ticket,
            timer: timer.abort_handle(),
        });
    }

    fn on_rearm(self: &Arc<Self>, ticket: u64) {
        let mut inner = self.inner.lock();
        let current =
            matches!(&inner.pending, Some(Pending::Rearm { ticket: t, .. }) if *t == ticket);
        if !current {
            return;
        }
        inner.pending = None;
        if inner.state == SchedulerState::Processing && !inner.queue.is_empty() {
            self.arm(&mut inner);
        }
    }

    fn cancel_pending(&self, inner: &mut Inner) {
        match inner.pending.take() {
            Some(Pending::Slot { ticket, request }) => {
                debug!(ticket, request = request.0, "idle slot request cancelled");
                self.port.cancel_idle(request);
            }
            Some(Pending::Rearm { timer, .. }) => timer.abort(),
            None => {}
        }
    }

    /// Mark a slot as running. `ticket` is the request being answered, `None` for a slot the
    /// host drives directly.
    fn claim_slot(&self, inner: &mut Inner, ticket: Option<u64>) -> bool {
        if let Some(ticket) = ticket {
            if inner.pending.as_ref().map(Pending::ticket) != Some(ticket) {
                debug!(ticket, "stale idle slot ignored");
                return false;
            }
            inner.pending = None;
        }
        if inner.disposed || inner.slot_active || inner.state != SchedulerState::Processing {
            return false;
        }
        if ticket.is_none() {
            self.cancel_pending(inner);
        }
        inner.slot_active = true;
        true
    }

    async fn on_idle_slot(self: &Arc<Self>, ticket: u64, deadline: Box<dyn IdleDeadline>) {
        {
            let mut inner = self.inner.lock();
            if !self.claim_slot(&mut inner, Some(ticket)) {
                return;
            }
        }
        self.drive_slot(&*deadline).await;
    }

    async fn drive_slot(self: &Arc<Self>, deadline: &dyn IdleDeadline) {
        let mut guard = SlotGuard {
            shared: Arc::clone(self),
            skipped: false,
        };
        guard.skipped = self.execute_slot(deadline).await;
    }

    /// Start tasks in priority order while the slot has budget. Returns true when the loop
    /// stopped because the head task did not fit the remaining idle time.
    async fn execute_slot(self: &Arc<Self>, deadline: &dyn IdleDeadline) -> bool {
        let cfg = &self.config;
        let monitor = cfg.enable_performance_monitoring;
        let started = Instant::now();
        let mut recorded = false;
        if deadline.did_timeout() {
            debug!("idle slot delivered after host timeout");
        }

        loop {
            let task = {
                let mut inner = self.inner.lock();
                if inner.disposed || inner.state != SchedulerState::Processing {
                    break;
                }
                if started.elapsed() >= cfg.maximum_idle_time {
                    debug!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "idle slot budget exhausted"
                    );
                    break;
                }
                let (head_id, estimated) = match inner.queue.peek() {
                    Some(t) => (t.id.clone(), t.estimated_duration),
                    None => break,
                };
                let remaining = deadline.time_remaining();
                if !recorded {
                    inner.stats.record_idle_slot(remaining, monitor);
                    recorded = true;
                }
                let required = cfg.minimum_idle_time.max(estimated);
                let forced = inner.force_head.as_deref() == Some(head_id.as_str())
                    && remaining >= cfg.minimum_idle_time;
                if remaining < required && !forced {
                    inner.stats.tasks_skipped += 1;
                    debug!(
                        task_id = %head_id,
                        remaining_ms = remaining.as_millis() as u64,
                        required_ms = required.as_millis() as u64,
                        "not enough idle time, task deferred"
                    );
                    self.note_skip(&mut inner, &head_id);
                    return true;
                }
                if forced {
                    info!(task_id = %head_id, "running starved task despite its estimate");
                    inner.force_head = None;
                }
                inner.head_skips = None;
                match inner.queue.pop() {
                    Some(task) => {
                        inner.running = Some(task.id.clone());
                        task
                    }
                    None => break,
                }
            };
            self.run_task(task).await;
        }

        if !recorded {
            let remaining = deadline.time_remaining();
            self.inner.lock().stats.record_idle_slot(remaining, monitor);
        }
        false
    }

    fn note_skip(&self, inner: &mut Inner, head_id: &str) {
        let count = match inner.head_skips.take() {
            Some((id, n)) if id == head_id => n + 1,
            _ => 1,
        };
        inner.head_skips = Some((head_id.to_string(), count));
        let max = self.config.max_consecutive_attempts;
        if max > 0 && count >= max {
            inner.stats.starvation_warnings += 1;
            inner.head_skips = None;
            warn!(
                task_id = %head_id,
                attempts = count,
                policy = ?self.config.starvation_policy,
                "task repeatedly skipped for lack of idle time"
            );
            if self.config.starvation_policy == StarvationPolicy::ForceRun {
                inner.force_head = Some(head_id.to_string());
            }
        }
    }

    async fn run_task(&self, task: Task) {
        let Task {
            id,
            name,
            processor,
            on_error,
            ..
        } = task;
        let started = Instant::now();
        let outcome = match tokio::spawn(async move { processor.process().await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(TaskError::Cancelled),
        };
        let elapsed = started.elapsed();

        if let Err(e) = &outcome {
            warn!(task_id = %id, name = %name, error = %e, "background task failed");
            if let Some(hook) = on_error {
                if std::panic::catch_unwind(AssertUnwindSafe(|| hook(e))).is_err() {
                    warn!(task_id = %id, "on_error hook panicked");
                }
            }
        }

        let monitor = self.config.enable_performance_monitoring;
        let mut inner = self.inner.lock();
        inner.running = None;
        match outcome {
            Ok(()) => {
                inner.stats.record_completion(monitor.then_some(elapsed));
                if monitor {
                    debug!(
                        task_id = %id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "task completed"
                    );
                } else {
                    debug!(task_id = %id, "task completed");
                }
            }
            Err(_) => inner.stats.tasks_failed += 1,
        }
    }

    /// Called once per slot when it ends, however it ends.
    fn settle_after_slot(self: &Arc<Self>, inner: &mut Inner, skipped: bool) {
        inner.slot_active = false;
        inner.running = None;
        if inner.disposed || inner.state != SchedulerState::Processing {
            return;
        }
        if inner.queue.is_empty() {
            debug!("queue drained");
            self.set_state(inner, SchedulerState::Idle);
        } else if skipped {
            self.rearm_later(inner);
        } else {
            self.arm(inner);
        }
    }

    fn on_visibility_change(self: &Arc<Self>, hidden: bool) {
        let mut inner = self.inner.lock();
        if inner.disposed || inner.tab_visible == !hidden {
            return;
        }
        inner.tab_visible = !hidden;
        inner.stats.tab_visibility_changes += 1;
        debug!(hidden, "visibility changed");
        if hidden {
            if inner.state == SchedulerState::Processing {
                self.cancel_pending(&mut inner);
                inner.paused_by_visibility = true;
                self.set_state(&mut inner, SchedulerState::Paused);
            }
        } else if inner.state == SchedulerState::Paused && inner.paused_by_visibility {
            self.begin(&mut inner);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        match inner.pending.take() {
            Some(Pending::Slot { request, .. }) => self.port.cancel_idle(request),
            Some(Pending::Rearm { timer, .. }) => timer.abort(),
            None => {}
        }
        if let (Some(v), Some(id)) = (&self.visibility, inner.subscription.take()) {
            v.unsubscribe(id);
        }
    }
}

/// Settles the scheduler when a slot ends, including when the slot future is dropped early.
struct SlotGuard {
    shared: Arc<Shared>,
    skipped: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        self.shared.settle_after_slot(&mut inner, self.skipped);
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idle_host::HostIdlePort;
    use idle_types::FixedDeadline;
    use std::time::Duration;

    fn noop(id: &str) -> Task {
        Task::from_fn(id, id, 1, Duration::from_millis(1), || async { Ok(()) })
    }

    fn scheduler(config: SchedulerConfig) -> (IdleTaskScheduler, Arc<HostIdlePort>) {
        let port = Arc::new(HostIdlePort::new());
        let idle: Arc<dyn IdlePort> = port.clone();
        (IdleTaskScheduler::new(config, Some(idle), None), port)
    }

    #[tokio::test]
    async fn duplicate_queued_id_is_rejected() {
        let (s, _port) = scheduler(SchedulerConfig::default());
        s.add_task(noop("a")).unwrap();
        assert_eq!(
            s.add_task(noop("a")),
            Err(SchedulerError::DuplicateTask("a".to_string()))
        );
        assert_eq!(s.get_status().queue_length, 1);
    }

    #[tokio::test]
    async fn running_id_is_rejected_until_finished() {
        let (s, port) = scheduler(SchedulerConfig::default());
        let seen: Arc<Mutex<Option<Result<(), SchedulerError>>>> = Arc::default();
        let (sched, out) = (s.clone(), Arc::clone(&seen));
        let task = Task::from_fn("a", "re-adds itself", 1, Duration::from_millis(1), move || {
            let (sched, out) = (sched.clone(), Arc::clone(&out));
            async move {
                *out.lock() = Some(sched.add_task(noop("a")));
                Ok(())
            }
        });
        s.add_task(task).unwrap();
        assert!(port.grant_deadline(FixedDeadline::new(Duration::from_millis(20))).await);
        assert_eq!(
            *seen.lock(),
            Some(Err(SchedulerError::DuplicateTask("a".to_string())))
        );
        assert!(s.add_task(noop("a")).is_ok());
    }

    #[tokio::test]
    async fn run_idle_slot_supersedes_pending_request() {
        let (s, port) = scheduler(SchedulerConfig::default());
        assert!(!s.run_idle_slot(&FixedDeadline::new(Duration::from_millis(50))).await);

        s.add_task(noop("a")).unwrap();
        assert_eq!(port.pending_requests(), 1);
        assert!(s.run_idle_slot(&FixedDeadline::new(Duration::from_millis(50))).await);
        assert_eq!(port.pending_requests(), 0);
        let status = s.get_status();
        assert_eq!(status.state, SchedulerState::Idle);
        assert_eq!(status.stats.tasks_completed, 1);
    }

    #[tokio::test]
    async fn removing_last_task_goes_idle() {
        let (s, port) = scheduler(SchedulerConfig::default());
        s.add_task(noop("a")).unwrap();
        assert!(!s.remove_task("missing"));
        assert!(s.remove_task("a"));
        assert!(!s.remove_task("a"));
        assert_eq!(s.get_status().state, SchedulerState::Idle);
        assert_eq!(port.pending_requests(), 0);
    }

    #[tokio::test]
    async fn stop_clears_queue_and_allows_restart() {
        let (s, port) = scheduler(SchedulerConfig::default());
        s.add_task(noop("a")).unwrap();
        s.add_task(noop("b")).unwrap();
        s.stop_processing();
        assert_eq!(s.get_status().queue_length, 0);
        assert_eq!(s.get_status().state, SchedulerState::Idle);
        assert_eq!(port.pending_requests(), 0);

        s.add_task(noop("a")).unwrap();
        assert_eq!(s.get_status().state, SchedulerState::Processing);
        assert_eq!(port.pending_requests(), 1);
    }

    #[tokio::test]
    async fn monitoring_off_skips_timing_stats() {
        let config = SchedulerConfig {
            enable_performance_monitoring: false,
            ..SchedulerConfig::default()
        };
        let (s, port) = scheduler(config);
        s.add_task(noop("a")).unwrap();
        assert!(port.grant_deadline(FixedDeadline::new(Duration::from_millis(30))).await);
        let stats = s.get_status().stats;
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.idle_slots, 1);
        assert_eq!(stats.total_processing_time_ms, 0.0);
        assert_eq!(stats.average_idle_time_ms, 0.0);
    }

    #[tokio::test]
    async fn dropping_scheduler_cancels_request() {
        let (s, port) = scheduler(SchedulerConfig::default());
        s.add_task(noop("a")).unwrap();
        assert_eq!(port.pending_requests(), 1);
        drop(s);
        assert_eq!(port.pending_requests(), 0);
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }
}
