//! Core types and port traits for the idle-time task scheduler.
//!
//! The scheduler talks to its host only through [`IdlePort`] and [`VisibilityPort`]; the
//! data types here are shared by the scheduler, the host adapters, the work classifier and
//! the HTTP control surface.

mod config;
mod deadline;
mod dto;
mod lifecycle;
mod traits;

pub use config::*;
pub use deadline::*;
pub use dto::*;
pub use lifecycle::*;
pub use traits::*;
