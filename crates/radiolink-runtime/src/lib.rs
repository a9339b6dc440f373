#![warn(missing_docs)]

//! radiolink-runtime: cooperative event-loop primitives.
//!
//! Everything here runs on a single loop thread except [`SchedulerHandle`] and the
//! handoff types, which interrupt-side code uses to defer work to the loop.

/// Cooperative mutual exclusion over exclusive resources.
pub mod arbiter;
/// Components, actions and the stages hosting them.
pub mod component;
/// Typed connectors between components.
pub mod gate;
/// Interrupt-to-loop handoff.
pub mod handoff;
/// Delayed actions.
pub mod scheduler;
/// Time sources.
pub mod time;

pub use arbiter::{Arbiter, Lease};
pub use component::{connect, Action, Actions, Component, PassThrough, Stage};
pub use gate::{InputGate, OutputGate};
pub use handoff::{Deferred, HandoffCell};
pub use scheduler::{ActionId, Scheduler, SchedulerHandle};
pub use time::{Clock, ManualClock, SystemClock};
