//! Deferred action scheduler.

pub mod queue;
pub mod worker;

pub use queue::{Action, ActionQueue, ActionReceiver, ScheduledAction};
pub use worker::{ActionHandler, spawn_worker};
