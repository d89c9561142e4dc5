//! Host adapters for the idle-time scheduler's two ports.

mod idle_port;
mod visibility;

pub use idle_port::HostIdlePort;
pub use idle_types::{IdleDeadline, IdlePort, VisibilityPort};
pub use visibility::{NoopVisibility, VisibilitySignal};
