//! HTTP control surface for the idle-time scheduler and the work classifier.
//!
//! Work reaches the scheduler through `POST /classify/plan` with `"enqueue": true`: the
//! deferred part of the plan is queued with a processor that logs each record.

pub mod server;
