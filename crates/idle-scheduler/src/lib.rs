//! Idle-time task scheduler: a priority queue of deferred work executed inside host idle
//! slots, with a timer fallback and page-visibility coupling.

mod fallback;
mod idle;
mod queue;
mod trait_;

pub use fallback::TimerFallbackPort;
pub use idle::IdleTaskScheduler;
pub use idle_types::{
    FnProcessor, IdleDeadline, IdlePort, SchedulerConfig, SchedulerError, SchedulerState,
    SchedulerStats, SchedulerStatus, StarvationPolicy, Task, TaskError, TaskProcessor,
    VisibilityPort,
};
pub use queue::TaskQueue;
pub use trait_::TaskScheduler;
